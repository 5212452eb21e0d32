use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use uuid::Uuid;

use crate::error::ExecError;
use crate::grpc::auth::caller_identity;
use crate::job::{Job, JobStatus};
use crate::proto::remote_executor_server::RemoteExecutor;
use crate::proto::{
    CmdRequest, GetRequest, JobDetails, JobOutput, JobStatus as ProtoJobStatus, StopRequest,
    StopResponse,
};
use crate::registry::{JobRegistry, Operation, UserDirectory};
use crate::worker::JobExecutor;

/// gRPC front for running, inspecting and stopping jobs.
pub struct ExecService {
    executor: JobExecutor,
    registry: Arc<RwLock<JobRegistry>>,
    users: Arc<UserDirectory>,
}

impl ExecService {
    pub fn new(
        executor: JobExecutor,
        registry: Arc<RwLock<JobRegistry>>,
        users: Arc<UserDirectory>,
    ) -> Self {
        Self {
            executor,
            registry,
            users,
        }
    }

    /// Resolve the caller and check they may perform `operation`.
    fn authorize<T>(&self, request: &Request<T>, operation: Operation) -> Result<String, Status> {
        let identity = caller_identity(request).ok_or(ExecError::Unauthenticated)?;
        if let Err(e) = self.users.authorize(identity, operation) {
            tracing::warn!(identity, %operation, "Request denied");
            return Err(e.into());
        }
        Ok(identity.to_string())
    }

    async fn lookup(&self, job_id: &str) -> Result<Arc<Job>, Status> {
        let id = Uuid::parse_str(job_id)
            .map_err(|_| ExecError::InvalidArgument(format!("invalid job id {job_id:?}")))?;
        let job = self
            .registry
            .read()
            .await
            .get(&id)
            .ok_or(ExecError::JobNotFound(id))?;
        Ok(job)
    }
}

type OutputStream = Pin<Box<dyn tokio_stream::Stream<Item = Result<JobOutput, Status>> + Send>>;

#[tonic::async_trait]
impl RemoteExecutor for ExecService {
    type GetOutputStream = OutputStream;

    async fn exec_command(
        &self,
        request: Request<CmdRequest>,
    ) -> Result<Response<JobDetails>, Status> {
        let identity = self.authorize(&request, Operation::Run)?;
        let req = request.into_inner();

        if req.command.trim().is_empty() {
            return Err(Status::invalid_argument("Command cannot be empty"));
        }

        let job = self.executor.run(&req.command, &req.arguments, &identity)?;
        self.registry.write().await.insert(job.clone());

        Ok(Response::new(job_details(&job)))
    }

    async fn get_status(
        &self,
        request: Request<GetRequest>,
    ) -> Result<Response<JobDetails>, Status> {
        self.authorize(&request, Operation::Status)?;
        let job = self.lookup(&request.get_ref().job_id).await?;
        Ok(Response::new(job_details(&job)))
    }

    async fn get_output(
        &self,
        request: Request<GetRequest>,
    ) -> Result<Response<Self::GetOutputStream>, Status> {
        let identity = self.authorize(&request, Operation::Output)?;
        let job = self.lookup(&request.get_ref().job_id).await?;

        let mut subscription = job.broadcaster().subscribe().await;
        tracing::debug!(job_id = %job.id, identity = %identity, "Streaming job output");

        let (tx, rx) = tokio::sync::mpsc::channel(32);
        let job_id = job.id;
        tokio::spawn(async move {
            while let Some(block) = subscription.next().await {
                let item = block
                    .map(|bytes| JobOutput {
                        output: bytes.to_vec(),
                    })
                    .map_err(Status::from);
                if tx.send(item).await.is_err() {
                    tracing::debug!(job_id = %job_id, "Output client disconnected");
                    break;
                }
            }
        });

        let stream = ReceiverStream::new(rx);
        Ok(Response::new(Box::pin(stream) as Self::GetOutputStream))
    }

    async fn stop_job(
        &self,
        request: Request<StopRequest>,
    ) -> Result<Response<StopResponse>, Status> {
        let identity = self.authorize(&request, Operation::Stop)?;
        let job = self.lookup(&request.get_ref().job_id).await?;

        self.executor.stop(&job).await?;
        tracing::info!(job_id = %job.id, identity = %identity, "Stop requested");
        Ok(Response::new(StopResponse {}))
    }
}

fn job_details(job: &Job) -> JobDetails {
    JobDetails {
        job_id: job.id.to_string(),
        status: status_to_proto(job.status()) as i32,
        exit_code: job.exit_code(),
        created_at_ms: job.created_at.timestamp_millis(),
    }
}

pub fn status_to_proto(status: JobStatus) -> ProtoJobStatus {
    match status {
        JobStatus::Running => ProtoJobStatus::Running,
        JobStatus::Completed => ProtoJobStatus::Completed,
        JobStatus::Errored => ProtoJobStatus::Errored,
        JobStatus::Stopped => ProtoJobStatus::Stopped,
    }
}
