use std::{future::Future, io, net::SocketAddr};

use anyhow::{Context, Result};
use tokio::{net::TcpListener, select};
use tracing::{info, warn};

use crate::{
    config::Settings,
    hub::{Hub, HubHandle},
    ingress,
    telnet::LineServer,
};

/// Both listeners plus the hub they feed.
pub struct ChatServer {
    telnet: LineServer,
    api: TcpListener,
    hub: HubHandle,
}

impl ChatServer {
    /// Binds both listeners and starts the hub. Bind failures are fatal.
    pub async fn bind(settings: &Settings) -> Result<Self> {
        let telnet_addr = settings.telnet_addr();
        let telnet_listener = TcpListener::bind((settings.telnet_ip.as_str(), settings.telnet_port))
            .await
            .with_context(|| format!("failed to bind telnet listener on {telnet_addr}"))?;
        let api_addr = settings.api_addr();
        let api = TcpListener::bind((settings.api_ip.as_str(), settings.api_port))
            .await
            .with_context(|| format!("failed to bind api listener on {api_addr}"))?;

        let (hub, _dispatch) = Hub::spawn(settings.delivery_timeout());
        let telnet = LineServer::new(telnet_listener, hub.clone(), settings.outbox_capacity);

        Ok(Self { telnet, api, hub })
    }

    pub fn telnet_addr(&self) -> io::Result<SocketAddr> {
        self.telnet.local_addr()
    }

    pub fn api_addr(&self) -> io::Result<SocketAddr> {
        self.api.local_addr()
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Serves telnet and HTTP until `shutdown` resolves or either server fails.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let ChatServer { telnet, api, hub } = self;
        tokio::pin!(shutdown);

        select! {
            _ = &mut shutdown => {
                info!("chat server shutting down");
                Ok(())
            }
            result = telnet.run() => result.context("telnet server stopped"),
            result = ingress::serve(api, hub) => result.context("api server stopped"),
        }
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}
