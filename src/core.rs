//! Startup wiring: build the provider router, skills, agent, cron engine,
//! memory sync and Tide from one config + state directory.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::agent::Agent;
use crate::bridge::{ActivityTracker, Bridge};
use crate::config::AppConfig;
use crate::cron::{CronEngine, CronStore};
use crate::memory::MemoryService;
use crate::providers::ModelRouter;
use crate::skills::{
    CronSkill, EditFileSkill, ImageSkill, MemorySkill, ReadFileSkill, ShellSkill, SkillRegistry,
    VoiceSkill,
};
use crate::state::StatePaths;
use crate::tide::Tide;
use crate::traits::{ModelClient, Transport, TransportKind, TransportSet};

struct Wiring {
    agent: Arc<Agent>,
    cron_store: Arc<CronStore>,
    memory: Option<Arc<MemoryService>>,
    wake_rx: mpsc::Receiver<()>,
    config: Arc<AppConfig>,
}

async fn wire(config: AppConfig, paths: &StatePaths) -> anyhow::Result<Wiring> {
    let config = Arc::new(config);
    let model: Arc<dyn ModelClient> = Arc::new(ModelRouter::from_config(
        &config,
        &paths.uploads_dir(),
    )?);

    let workspace = match &config.memory.workspace_dir {
        Some(dir) => std::path::PathBuf::from(dir),
        None => paths.workspace_dir(),
    };

    let memory = if config.memory.enabled {
        let index_path = match &config.memory.index_path {
            Some(p) => std::path::PathBuf::from(p),
            None => paths.memory_index_file(),
        };
        let service = MemoryService::open(
            &config.memory,
            index_path,
            workspace.clone(),
            config.user_tz(),
            model.clone(),
        )
        .await?;
        Some(Arc::new(service))
    } else {
        None
    };

    let cron_store = Arc::new(CronStore::new(paths.cron_store_file()));
    let (wake_tx, wake_rx) = mpsc::channel(8);

    let mut skills: Vec<Arc<dyn crate::traits::Skill>> = vec![
        Arc::new(CronSkill::new(
            cron_store.clone(),
            wake_tx,
            config.user_tz(),
        )),
        Arc::new(EditFileSkill),
        Arc::new(ReadFileSkill),
        Arc::new(ShellSkill::new(config.skills.shell.clone())),
        Arc::new(ImageSkill::new(model.clone())),
        Arc::new(VoiceSkill::new(model.clone())),
    ];
    if let Some(memory) = &memory {
        skills.push(Arc::new(MemorySkill::new(memory.clone())));
    }

    let registry = Arc::new(SkillRegistry::new(skills, &config.skills.enabled));
    let agent = Arc::new(Agent::new(model, registry, config.clone()));

    Ok(Wiring {
        agent,
        cron_store,
        memory,
        wake_rx,
        config,
    })
}

fn workspace_of(config: &AppConfig, paths: &StatePaths) -> std::path::PathBuf {
    match &config.memory.workspace_dir {
        Some(dir) => std::path::PathBuf::from(dir),
        None => paths.workspace_dir(),
    }
}

/// Daemon mode: everything running until the process is stopped.
///
/// Concrete WhatsApp/Telegram adapters live outside this crate; they are
/// registered here by the embedding build. Without any, startup fails.
pub async fn run(config: AppConfig, paths: StatePaths) -> anyhow::Result<()> {
    let workspace = workspace_of(&config, &paths);
    let wiring = wire(config, &paths).await?;

    let transports = TransportSet::new(Vec::new());
    if wiring.config.channels.telegram.is_some() {
        warn!("channels.telegram is configured but no Telegram adapter is built into this binary");
    }
    if transports.is_empty() {
        anyhow::bail!(
            "No transport adapter is wired; the daemon has no way to receive or send messages"
        );
    }
    let transports = Arc::new(transports);

    let activity = Arc::new(ActivityTracker::default());
    let _bridge = Arc::new(Bridge::new(
        wiring.agent.clone(),
        transports.clone(),
        wiring.config.clone(),
        workspace.clone(),
        paths.root().to_path_buf(),
        activity.clone(),
    ));

    if let Some(memory) = wiring.memory.clone() {
        spawn_memory_sync(memory, wiring.config.memory.sync.interval_minutes);
    }

    let engine = Arc::new(CronEngine::new(
        wiring.cron_store.clone(),
        wiring.agent.clone(),
        transports.clone(),
        wiring.config.clone(),
        workspace.clone(),
        paths.root().to_path_buf(),
        wiring.wake_rx,
    ));
    engine.start();

    if wiring.config.tide.enabled {
        Arc::new(Tide::new(
            wiring.agent.clone(),
            transports.clone(),
            wiring.config.clone(),
            workspace,
            paths.root().to_path_buf(),
            activity,
        ))
        .start();
    }

    info!("moobot running");
    // Transports own their receive loops; the core parks here.
    park_forever().await
}

async fn park_forever() -> anyhow::Result<()> {
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}

fn spawn_memory_sync(memory: Arc<MemoryService>, interval_minutes: u64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(interval_minutes.max(1) * 60);
        loop {
            if let Err(e) = memory.sync().await {
                warn!("Memory sync failed: {:#}", e);
            }
            tokio::time::sleep(interval).await;
        }
    });
}

/// Test entry-point: one inbound message, one reply, exit.
///
/// Uses a capturing transport so the reply can be printed between the E2E
/// markers on stdout. Memory is synced once up front so notes written by
/// the harness are searchable within the same invocation.
pub async fn send_once(
    config: AppConfig,
    paths: StatePaths,
    message: &str,
) -> anyhow::Result<String> {
    let workspace = workspace_of(&config, &paths);
    let wiring = wire(config, &paths).await?;

    if let Some(memory) = &wiring.memory {
        memory.sync().await?;
    }

    let transport = Arc::new(CollectingTransport::default());
    let transports = Arc::new(TransportSet::new(vec![
        transport.clone() as Arc<dyn Transport>
    ]));

    let jid = wiring
        .config
        .owner
        .telegram_user_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "cli".to_string());

    let bridge = Bridge::new(
        wiring.agent.clone(),
        transports,
        wiring.config.clone(),
        workspace,
        paths.root().to_path_buf(),
        Arc::new(ActivityTracker::default()),
    );

    bridge.handle_inbound(&jid, false, message).await
}

/// Transport that swallows sends; the test CLI reads the reply from the
/// bridge return value instead.
#[derive(Default)]
struct CollectingTransport {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl Transport for CollectingTransport {
    fn name(&self) -> String {
        "collect".to_string()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::LinkedDevice
    }

    async fn send_text(&self, _jid: &str, text: &str) -> anyhow::Result<()> {
        self.sent.lock().await.push(text.to_string());
        Ok(())
    }

    async fn send_image(
        &self,
        _jid: &str,
        path: &Path,
        _caption: Option<&str>,
    ) -> anyhow::Result<()> {
        self.sent.lock().await.push(format!("[image {}]", path.display()));
        Ok(())
    }

    async fn send_voice(&self, _jid: &str, audio_path: &Path) -> anyhow::Result<()> {
        self.sent
            .lock()
            .await
            .push(format!("[voice {}]", audio_path.display()));
        Ok(())
    }
}
