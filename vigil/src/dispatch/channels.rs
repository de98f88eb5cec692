// vigil/src/dispatch/channels.rs
//
// Shipped channel adapters.
//
// ChatChannel appends severity-colored block messages as JSONL — wire
// the file to your chat webhook / broker bridge in production. Email and
// SMS adapters slot in behind the same AlertChannel trait.
// ConsoleChannel renders alerts to the terminal with ANSI colors for
// interactive runs.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::json;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::dispatch::format::BlockMessage;
use crate::dispatch::AlertChannel;
use crate::error::{Result, VigilError};
use crate::events::{Alert, AlertSeverity};

const CHAT_FILE: &str = "chat_alerts.jsonl";

// ── Chat ──────────────────────────────────────────────────────────────────────

pub struct ChatChannel {
    out: PathBuf,
}

impl ChatChannel {
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let dir: PathBuf = output_dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { out: dir.join(CHAT_FILE) })
    }
}

#[async_trait]
impl AlertChannel for ChatChannel {
    fn id(&self) -> &str {
        "chat"
    }

    fn dedup(&self) -> bool {
        true
    }

    async fn deliver(&self, alert: &Alert, message: &BlockMessage) -> Result<()> {
        let line = json!({
            "alert_id": alert.alert_id,
            "severity": alert.severity.to_string(),
            "color":    message.color,
            "blocks":   message.render()["blocks"],
        });

        let io = async {
            let mut f = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.out)
                .await?;
            f.write_all(format!("{line}\n").as_bytes()).await?;
            Ok::<(), std::io::Error>(())
        };

        io.await.map_err(|e| VigilError::Channel {
            channel: "chat".to_string(),
            reason:  e.to_string(),
        })
    }
}

// ── Console ───────────────────────────────────────────────────────────────────

pub struct ConsoleChannel;

fn ansi(severity: AlertSeverity) -> (&'static str, &'static str) {
    match severity {
        AlertSeverity::Critical => ("\x1b[91;1m", "🔴"),
        AlertSeverity::High     => ("\x1b[93;1m", "🟠"),
        AlertSeverity::Medium   => ("\x1b[96m", "🟡"),
        AlertSeverity::Low      => ("\x1b[92m", "🟢"),
    }
}

#[async_trait]
impl AlertChannel for ConsoleChannel {
    fn id(&self) -> &str {
        "console"
    }

    async fn deliver(&self, alert: &Alert, message: &BlockMessage) -> Result<()> {
        let (color, icon) = ansi(alert.severity);
        let reset = "\x1b[0m";
        println!("\n{}{} {}{}", color, icon, message.header, reset);
        println!("  {}", message.body);
        println!("  \x1b[90m{}\x1b[0m", message.context);
        for (k, v) in &message.fields {
            println!("  {k}: {v}");
        }
        Ok(())
    }
}
