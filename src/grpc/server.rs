use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::grpc::auth::Authenticator;
use crate::grpc::exec_service::ExecService;
use crate::proto::remote_executor_server::RemoteExecutorServer;
use crate::registry::{JobRegistry, UserDirectory};
use crate::tls::TlsIdentity;
use crate::worker::JobExecutor;

pub struct GrpcServer {
    config: ServerConfig,
    executor: JobExecutor,
    registry: Arc<RwLock<JobRegistry>>,
    users: Arc<UserDirectory>,
    tls_identity: Option<TlsIdentity>,
}

impl GrpcServer {
    pub fn new(config: ServerConfig, tls_identity: Option<TlsIdentity>) -> Self {
        Self {
            executor: JobExecutor::new(config.log.clone()),
            users: Arc::new(UserDirectory::from_entries(&config.users)),
            registry: Arc::new(RwLock::new(JobRegistry::new())),
            config,
            tls_identity,
        }
    }

    /// Serve until `shutdown` is cancelled, then stop every running job.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let service = ExecService::new(
            self.executor.clone(),
            self.registry.clone(),
            self.users.clone(),
        );
        // Certificates take precedence; the fallback only applies to callers
        // that present none.
        let authenticator = Authenticator::new(self.config.insecure_identity.clone());

        let mut builder = Server::builder();
        if let Some(ref tls_identity) = self.tls_identity {
            builder = builder.tls_config(tls_identity.server_tls_config())?;
        }

        tracing::info!(
            addr = %self.config.listen_addr,
            tls = self.tls_identity.is_some(),
            log_dir = %self.config.log.dir.display(),
            users = self.users.len(),
            "Starting gRPC server"
        );

        let signal = shutdown.clone();
        builder
            .add_service(RemoteExecutorServer::with_interceptor(service, authenticator))
            .serve_with_shutdown(self.config.listen_addr, async move {
                signal.cancelled().await;
            })
            .await?;

        self.stop_running_jobs().await;
        Ok(())
    }

    async fn stop_running_jobs(&self) {
        let registry = self.registry.read().await;
        if registry.is_empty() {
            return;
        }
        let jobs = registry.running_jobs();
        tracing::info!(
            running = jobs.len(),
            total = registry.len(),
            "Stopping running jobs"
        );
        drop(registry);

        for job in jobs {
            if let Err(e) = self.executor.stop(&job).await {
                tracing::warn!(job_id = %job.id, error = %e, "Failed to stop job during shutdown");
            }
        }
    }
}
