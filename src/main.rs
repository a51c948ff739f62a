//! Concierge CLI
//!
//! 入口：初始化日志、按配置构建编排器，运行交互式 REPL。
//! 敏感动作挂起时输入 `y` 批准，其它任何文本视为拒绝理由。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use concierge::config::{load_config, AppConfig};
use concierge::core::{ApprovalDecision, Orchestrator, OrchestratorBuilder, TurnReply};
use concierge::dialog::DialogEvent;
use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

const HELP: &str = "Commands: /history, /rewind <seq>, /quit";

struct CliArgs {
    config: Option<PathBuf>,
    session: Option<String>,
}

fn parse_args() -> anyhow::Result<CliArgs> {
    let mut args = CliArgs {
        config: None,
        session: None,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => args.config = Some(it.next().context("--config needs a path")?.into()),
            "--session" => args.session = Some(it.next().context("--session needs an id")?),
            other => anyhow::bail!("unknown argument: {other}\nusage: concierge [--config <path>] [--session <id>]"),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    concierge::observability::init();
    let args = parse_args()?;

    let cfg = load_config(args.config).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let orchestrator = Arc::new(
        OrchestratorBuilder::from_config(&cfg)
            .context("Failed to assemble orchestrator")?
            .with_event_sink(event_tx)
            .build()
            .context("Failed to build orchestrator")?,
    );
    tokio::spawn(print_events(event_rx));

    let session = orchestrator
        .open_session(args.session.as_deref())
        .await
        .context("Failed to open session")?;
    let session_id = session.session_id.clone();

    // Ctrl+C 取消当前在途调用
    {
        let orchestrator = Arc::clone(&orchestrator);
        let session_id = session_id.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if !orchestrator.cancel(&session_id) {
                    orchestrator.shutdown();
                    std::process::exit(130);
                }
            }
        });
    }

    let name = cfg.app.name.as_deref().unwrap_or("Concierge");
    println!("{name} - session {session_id}\n{HELP}");
    let mut awaiting = session.is_suspended();
    if let Some(pending) = &session.pending_action {
        println!("Resumed with a pending action: {} {}", pending.name, pending.arguments_value());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        let prompt = if awaiting { "approve? [y / reason] > " } else { "> " };
        stdout.write_all(prompt.as_bytes()).await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line {
            "/quit" => break,
            "/history" => {
                print_history(&orchestrator, &session_id).await;
                continue;
            }
            _ if line.starts_with("/rewind") => {
                let seq = line.trim_start_matches("/rewind").trim().parse::<u64>();
                match seq {
                    Ok(seq) => match orchestrator.rewind(&session_id, seq).await {
                        Ok(cp) => {
                            awaiting = cp.state.is_suspended();
                            println!("Rewound to checkpoint {seq} (now #{})", cp.seq);
                        }
                        Err(e) => eprintln!("error: {}", e.user_message()),
                    },
                    Err(_) => println!("usage: /rewind <seq>"),
                }
                continue;
            }
            _ => {}
        }

        let result = if awaiting {
            let decision = if line.eq_ignore_ascii_case("y") {
                ApprovalDecision::Approve
            } else {
                ApprovalDecision::Reject {
                    reason: line.to_string(),
                }
            };
            orchestrator.submit_approval(&session_id, decision).await
        } else {
            orchestrator.submit_user_message(&session_id, line).await
        };

        match result {
            Ok(reply) => {
                awaiting = reply.awaiting_approval;
                print_reply(&reply);
            }
            Err(e) => {
                tracing::error!(error = %e, "turn failed");
                eprintln!("error: {}", e.user_message());
            }
        }
    }

    orchestrator.shutdown();
    let (prompt, completion, total) = orchestrator.token_usage();
    if total > 0 {
        println!("Tokens: prompt {prompt}, completion {completion}, total {total}");
    }
    Ok(())
}

fn print_reply(reply: &TurnReply) {
    if !reply.assistant_text.is_empty() {
        println!("[{}] {}", reply.active_handler, reply.assistant_text);
    }
    if let Some(pending) = &reply.pending_action {
        println!(
            "The assistant wants to run {} with {}.",
            pending.name,
            pending.arguments_value()
        );
    }
}

async fn print_history(orchestrator: &Orchestrator, session_id: &str) {
    let mut history = orchestrator.history(session_id);
    let mut count = 0;
    while let Some(item) = history.next().await {
        match item {
            Ok(cp) => {
                count += 1;
                println!(
                    "#{:<3} {:<13} handler={:<15} messages={}",
                    cp.seq,
                    cp.boundary.as_str(),
                    cp.state.delegation_stack.top().to_string(),
                    cp.state.message_log.len()
                );
            }
            Err(e) => {
                eprintln!("error: {e}");
                break;
            }
        }
    }
    if count == 0 {
        println!("No checkpoints yet.");
    }
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<DialogEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            DialogEvent::ActionRequested { handler, action, .. } => eprintln!("  [{handler}] -> {action}"),
            DialogEvent::ActionCompleted { action, ok, preview } => {
                let mark = if ok { "ok" } else { "failed" };
                eprintln!("  {action} {mark}: {preview}");
            }
            DialogEvent::Delegated { to, note, .. } => eprintln!("  handing off to {to}: {note}"),
            DialogEvent::Escalated { to, .. } => eprintln!("  back to {to}"),
            DialogEvent::ModelRetry { handler, attempt } => eprintln!("  [{handler}] empty response, retry {attempt}"),
            _ => {}
        }
    }
}
