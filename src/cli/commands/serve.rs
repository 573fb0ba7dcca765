//! serve command
//!
//! # Startup order
//!
//! 1. Load configuration, open and create repositories
//! 2. Install or upgrade pre-receive hooks in every repository
//! 3. Force-sync mirrors created in step 1
//! 4. Reconcile: push branches left ahead of upstream by a crash
//! 5. Bind and serve until Ctrl-C
//!
//! Step 4 completes before the listener exists, so no request can observe
//! a mirror that still holds unpushed work.

use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result};

use super::open;
use crate::gateway::Gateway;
use crate::reconcile::Reconciler;
use crate::server::Server;

pub async fn serve(config: Option<&Path>, listen: Option<SocketAddr>) -> Result<()> {
    let opened = open(config)?;
    opened
        .registry
        .hook()
        .install_all(opened.registry.repos_dir())
        .context("failed to install hooks")?;

    let gateway = Gateway::from_config(&opened.config, opened.registry);
    gateway.initial_sync(&opened.created).await;

    let report = Reconciler::new(gateway.clone()).run().await;
    if !report.is_clean() {
        tracing::warn!(
            failed = report.failed.len(),
            "some branches are still ahead of upstream; serving anyway"
        );
    }

    let listen = match listen {
        Some(addr) => addr,
        None => opened.config.listen_addr()?,
    };
    Server::new(gateway, listen, opened.config.max_body_bytes())
        .run(shutdown_signal())
        .await?;
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for Ctrl-C; stopping");
    }
    tracing::info!("shutdown requested");
}
