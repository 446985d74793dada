//! Wires a transmitter and a receiver together over an in-process broker.

use std::path::PathBuf;
use std::sync::Arc;

use mqxfer_transfer::{
    DirectorySinkFactory, Receiver, TransferReport, TransferSource, Transmitter, TransmitterEvent,
};
use mqxfer_transport::MemoryBroker;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

/// Sends `file` through the broker and returns the receiver's verified report.
pub async fn run(config: Config, file: PathBuf) -> anyhow::Result<TransferReport> {
    let broker = MemoryBroker::new();
    let sinks = DirectorySinkFactory::new(&config.output_dir)?;

    let mut receiver = Receiver::new(
        Arc::new(broker.client()),
        Arc::new(sinks),
        config.transfer.clone(),
    )
    .start(&config.topic)
    .await?;

    let cancel = CancellationToken::new();
    let mut transmitter = Transmitter::new(Arc::new(broker.client()), config.transfer.clone())
        .with_cancel(cancel.clone());
    let source = TransferSource::open(&file).await?;

    let (tx, mut rx) = mpsc::channel(256);
    let progress = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                TransmitterEvent::Started { file_name, total_size } => {
                    tracing::info!(%file_name, total_size, "sending");
                }
                TransmitterEvent::Progress(p) => {
                    tracing::info!(
                        percent = p.percent,
                        bytes = p.bytes_transferred,
                        rate = %format!("{:.0} B/s", p.bytes_per_second),
                        "progress"
                    );
                }
            }
        }
    });

    let sent = tokio::select! {
        result = transmitter.start(source, &config.topic, &tx) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, cancelling transfer");
            cancel.cancel();
            anyhow::bail!("transfer cancelled");
        }
    };
    drop(tx);
    let _ = progress.await;

    let report = receiver.wait_for_outcome().await?;
    if report.checksum != sent.checksum {
        anyhow::bail!(
            "receiver verified {} but transmitter sent {}",
            report.checksum,
            sent.checksum
        );
    }
    receiver.stop().await;
    Ok(report)
}
