use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::cron::{describe, parse_schedule, CronJob, CronStore, ParsedSchedule, Schedule};
use crate::skills::require_str;
use crate::traits::{Skill, ToolSpec, TurnContext};

/// Reminders and recurring jobs. Writes go straight to the persistent store;
/// the engine is woken through a channel so new jobs arm without waiting for
/// the next tick.
pub struct CronSkill {
    store: Arc<CronStore>,
    wake: mpsc::Sender<()>,
    tz: Tz,
}

impl CronSkill {
    pub fn new(store: Arc<CronStore>, wake: mpsc::Sender<()>, tz: Tz) -> Self {
        Self { store, wake, tz }
    }
}

#[async_trait]
impl Skill for CronSkill {
    fn id(&self) -> &str {
        "cron"
    }

    fn doc(&self) -> Option<String> {
        Some(
            "schedule reminders with cron_add; when the user's request leaves the time, \
             recipient or wording ambiguous, ask a clarifying question instead of guessing"
                .to_string(),
        )
    }

    fn tools(&self) -> Vec<ToolSpec> {
        vec![
            ToolSpec {
                name: "cron_add".to_string(),
                description: "Schedule a reminder. Use natural schedule text: 'in 2 minutes', \
                              'every 5 minutes', 'daily at 9am', 'tomorrow at 9am', or a 5-field \
                              cron expression. One call per reminder."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "name": { "type": "string", "description": "Short label for the reminder" },
                        "message": { "type": "string", "description": "What to tell the user when it fires" },
                        "schedule": { "type": "string", "description": "When to fire, natural text or cron" },
                        "tz": { "type": "string", "description": "IANA zone override, e.g. Europe/Amsterdam" }
                    },
                    "required": ["name", "message", "schedule"]
                }),
            },
            ToolSpec {
                name: "cron_list".to_string(),
                description: "List the scheduled reminders for this chat.".to_string(),
                parameters: json!({ "type": "object", "properties": {} }),
            },
            ToolSpec {
                name: "cron_cancel".to_string(),
                description: "Cancel a reminder by id or exact name.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "id": { "type": "string", "description": "Job id from cron_list" },
                        "name": { "type": "string", "description": "Exact reminder name" }
                    }
                }),
            },
        ]
    }

    async fn execute(
        &self,
        ctx: &TurnContext,
        tool_name: &str,
        args: &Value,
    ) -> anyhow::Result<String> {
        match tool_name {
            "cron_add" => self.add(ctx, args).await,
            "cron_list" => self.list(ctx).await,
            "cron_cancel" => self.cancel(args).await,
            other => anyhow::bail!("Unknown cron tool '{}'", other),
        }
    }
}

impl CronSkill {
    async fn add(&self, ctx: &TurnContext, args: &Value) -> anyhow::Result<String> {
        let name = require_str(args, "name")?;
        let message = require_str(args, "message")?;
        let schedule_text = require_str(args, "schedule")?;

        let tz = match args["tz"].as_str() {
            Some(zone) => zone
                .parse()
                .map_err(|_| anyhow::anyhow!("Unknown timezone '{}'", zone))?,
            None => self.tz,
        };

        let schedule = match parse_schedule(schedule_text, tz, Utc::now())? {
            ParsedSchedule::OneShot { at } => Schedule::OneShot {
                at_ms: at.timestamp_millis(),
            },
            ParsedSchedule::Recurring { expr } => Schedule::Recurring {
                expr,
                tz: Some(tz.to_string()),
            },
        };

        let job = CronJob {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            enabled: true,
            schedule: schedule.clone(),
            message: message.to_string(),
            jid: ctx.jid.clone(),
            sent_at_ms: None,
        };
        self.store.add_job(job).await?;
        let _ = self.wake.try_send(());

        Ok(format!(
            "Scheduled '{}' ({}).",
            name,
            describe(&schedule, self.tz)
        ))
    }

    async fn list(&self, ctx: &TurnContext) -> anyhow::Result<String> {
        let jobs = self.store.load_jobs().await;
        let mine: Vec<&CronJob> = jobs.iter().filter(|j| j.jid == ctx.jid).collect();
        if mine.is_empty() {
            return Ok("No reminders are scheduled.".to_string());
        }
        let mut out = format!("{} reminder(s):\n", mine.len());
        for job in mine {
            out.push_str(&format!(
                "- {} [{}]: {} ({})\n",
                job.name,
                job.id,
                describe(&job.schedule, self.tz),
                if job.enabled { "enabled" } else { "paused" },
            ));
        }
        Ok(out)
    }

    async fn cancel(&self, args: &Value) -> anyhow::Result<String> {
        if let Some(id) = args["id"].as_str().filter(|s| !s.is_empty()) {
            if self.store.remove_job(id).await? {
                return Ok(format!("Cancelled reminder {}.", id));
            }
            anyhow::bail!("No reminder with id '{}'", id);
        }
        if let Some(name) = args["name"].as_str().filter(|s| !s.is_empty()) {
            let jobs = self.store.load_jobs().await;
            let Some(job) = jobs.iter().find(|j| j.name == name) else {
                anyhow::bail!("No reminder named '{}'", name);
            };
            let id = job.id.clone();
            self.store.remove_job(&id).await?;
            return Ok(format!("Cancelled reminder '{}'.", name));
        }
        anyhow::bail!("Provide either id or name")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn skill(dir: &std::path::Path) -> (CronSkill, Arc<CronStore>) {
        let store = Arc::new(CronStore::new(dir.join("jobs.json")));
        let (tx, _rx) = mpsc::channel(4);
        (CronSkill::new(store.clone(), tx, chrono_tz::UTC), store)
    }

    fn ctx() -> TurnContext {
        TurnContext::new("123", false, PathBuf::from("/tmp"), PathBuf::from("/tmp"))
    }

    #[tokio::test]
    async fn add_one_shot_creates_single_job() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (skill, store) = skill(tmp.path());
        let before = Utc::now().timestamp_millis();

        let reply = skill
            .execute(
                &ctx(),
                "cron_add",
                &json!({
                    "name": "check lock",
                    "message": "check the lock",
                    "schedule": "in 2 minutes"
                }),
            )
            .await
            .unwrap();
        assert!(reply.contains("Scheduled"));
        assert!(reply.contains("check lock"));

        let jobs = store.load_jobs().await;
        assert_eq!(jobs.len(), 1);
        match jobs[0].schedule {
            Schedule::OneShot { at_ms } => {
                let delta = at_ms - before;
                assert!((110_000..130_000).contains(&delta), "delta was {}", delta);
            }
            _ => panic!("expected one-shot"),
        }
        assert_eq!(jobs[0].jid, "123");
        assert!(jobs[0].sent_at_ms.is_none());
    }

    #[tokio::test]
    async fn add_recurring_stores_cron_expr() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (skill, store) = skill(tmp.path());

        skill
            .execute(
                &ctx(),
                "cron_add",
                &json!({
                    "name": "stretch",
                    "message": "time to stretch",
                    "schedule": "every 5 minutes"
                }),
            )
            .await
            .unwrap();

        let jobs = store.load_jobs().await;
        assert_eq!(jobs.len(), 1);
        match &jobs[0].schedule {
            Schedule::Recurring { expr, .. } => assert_eq!(expr, "*/5 * * * *"),
            _ => panic!("expected recurring"),
        }
    }

    #[tokio::test]
    async fn two_adds_make_two_distinct_jobs() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (skill, store) = skill(tmp.path());

        for (name, schedule) in [("a", "in 5 minutes"), ("b", "in 10 minutes")] {
            skill
                .execute(
                    &ctx(),
                    "cron_add",
                    &json!({"name": name, "message": name, "schedule": schedule}),
                )
                .await
                .unwrap();
        }

        let jobs = store.load_jobs().await;
        assert_eq!(jobs.len(), 2);
        assert_ne!(jobs[0].id, jobs[1].id);
        let ats: Vec<i64> = jobs
            .iter()
            .map(|j| match j.schedule {
                Schedule::OneShot { at_ms } => at_ms,
                _ => panic!("expected one-shot"),
            })
            .collect();
        assert_ne!(ats[0], ats[1]);
    }

    #[tokio::test]
    async fn list_empty_store_is_a_sentence() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (skill, _store) = skill(tmp.path());
        let reply = skill.execute(&ctx(), "cron_list", &json!({})).await.unwrap();
        assert!(!reply.is_empty());
        assert!(reply.to_lowercase().contains("no reminders"));
    }

    #[tokio::test]
    async fn list_shows_only_this_chats_jobs() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (skill, store) = skill(tmp.path());
        store
            .add_job(CronJob {
                id: "other".to_string(),
                name: "elsewhere".to_string(),
                enabled: true,
                schedule: Schedule::OneShot { at_ms: i64::MAX },
                message: "m".to_string(),
                jid: "999".to_string(),
                sent_at_ms: None,
            })
            .await
            .unwrap();

        let reply = skill.execute(&ctx(), "cron_list", &json!({})).await.unwrap();
        assert!(reply.to_lowercase().contains("no reminders"));
    }

    #[tokio::test]
    async fn cancel_by_name_and_id() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (skill, store) = skill(tmp.path());
        skill
            .execute(
                &ctx(),
                "cron_add",
                &json!({"name": "zap", "message": "m", "schedule": "in 1 hour"}),
            )
            .await
            .unwrap();

        let reply = skill
            .execute(&ctx(), "cron_cancel", &json!({"name": "zap"}))
            .await
            .unwrap();
        assert!(reply.contains("Cancelled"));
        assert!(store.load_jobs().await.is_empty());

        assert!(skill
            .execute(&ctx(), "cron_cancel", &json!({"id": "nope"}))
            .await
            .is_err());
    }
}
