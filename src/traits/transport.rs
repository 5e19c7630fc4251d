use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

/// Which messaging protocol family a transport speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Bot-API messenger (Telegram-style); chat ids are numeric.
    BotApi,
    /// Linked-device messenger (WhatsApp-style); jids carry a domain suffix.
    LinkedDevice,
}

/// A messaging transport the core can deliver replies through.
///
/// Concrete protocol adapters live outside the core; each only needs to
/// implement this trait to integrate. There is no shared base type — the
/// capability set is the contract.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Unique name for logs (e.g. "telegram", "whatsapp").
    fn name(&self) -> String;

    fn kind(&self) -> TransportKind;

    async fn send_text(&self, jid: &str, text: &str) -> anyhow::Result<()>;

    async fn send_image(
        &self,
        jid: &str,
        path: &Path,
        caption: Option<&str>,
    ) -> anyhow::Result<()>;

    async fn send_voice(&self, jid: &str, audio_path: &Path) -> anyhow::Result<()>;
}

/// The wired transports, with jid-shape routing.
#[derive(Default)]
pub struct TransportSet {
    transports: Vec<Arc<dyn Transport>>,
}

impl TransportSet {
    pub fn new(transports: Vec<Arc<dyn Transport>>) -> Self {
        Self { transports }
    }

    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }

    /// A purely numeric chat identifier (optional leading `-` for group
    /// chats) belongs to the bot-API side; everything else is linked-device.
    pub fn kind_for_jid(jid: &str) -> TransportKind {
        let digits = jid.strip_prefix('-').unwrap_or(jid);
        if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
            TransportKind::BotApi
        } else {
            TransportKind::LinkedDevice
        }
    }

    /// Pick the transport for a jid: first match on kind, else the first
    /// wired transport as a fallback so single-transport setups route
    /// everything there.
    pub fn for_jid(&self, jid: &str) -> Option<Arc<dyn Transport>> {
        let kind = Self::kind_for_jid(jid);
        self.transports
            .iter()
            .find(|t| t.kind() == kind)
            .or_else(|| self.transports.first())
            .cloned()
    }
}
