//! Line-oriented driver: host messages in on stdin, events out on stdout.
//!
//! Each stdin line is one host message (`["Add", null, null, "Goal True.", false]`,
//! `["LoadPkg", ["+coq-base"]]`, ...). Each stdout line is one event:
//! ```text
//! {"event":"message","payload":["Added",2,{"bp":0,"ep":10,"line_nb":1,"bol_pos":0}]}
//! {"event":"progress","payload":{"uri":"+coq-base","download":{"total":1024,"downloaded":512}}}
//! ```
//! Ctrl-C sets the interrupt flag instead of terminating; close stdin to quit.

use std::sync::Arc;

use coqpod_core::protocol::HostMessage;
use tokio::io::{stdin, stdout, AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::pod::Pod;

pub async fn run_stdio(pod: Arc<Pod>) -> anyhow::Result<()> {
    tracing::info!("Starting pod via stdio");

    let mut events = pod.subscribe();
    let writer = tokio::spawn(async move {
        let mut out = stdout();
        while let Some(event) = events.recv().await {
            let line = format!("{}\n", event.to_value());
            if out.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            let _ = out.flush().await;
        }
    });

    let interrupt = pod.interrupt();
    let watcher = tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt requested");
            interrupt.set();
        }
    });

    let mut lines = BufReader::new(stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let message = match HostMessage::decode(&line) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!("Rejected message {}: {}", line, e);
                continue;
            }
        };
        if let Err(e) = pod.send(message).await {
            tracing::error!("{}", e);
        }
    }

    tracing::info!("stdin closed, document at exit:\n{}", pod.document().render());
    watcher.abort();
    pod.shutdown();
    writer.await?;
    Ok(())
}
