//! # Summary Requests
//!
//! Analysis summaries are fetched by job id. A request for many ids is cut
//! into fixed-size chunks so the backend never sees an oversized id list.

use crate::batcher::{Dispatch, RequestBatcher};
use crate::config::SummaryConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRequest {
    pub user_id: String,
    pub job_ids: Vec<String>,
}

impl SummaryRequest {
    pub fn new(user_id: impl Into<String>, job_ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { user_id: user_id.into(), job_ids: job_ids.into_iter().map(Into::into).collect() }
    }
}

/// Backend that answers one chunk of job ids
#[async_trait]
pub trait SummaryClient: Send + Sync + 'static {
    type Summary: Send + 'static;

    async fn fetch_summaries(&self, request: &SummaryRequest) -> anyhow::Result<Self::Summary>;
}

pub struct SummaryDispatcher<C> {
    client: C,
    chunk_size: usize,
}

impl<C: SummaryClient> SummaryDispatcher<C> {
    pub fn new(client: C, chunk_size: usize) -> Self {
        Self { client, chunk_size: chunk_size.max(1) }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

#[async_trait]
impl<C: SummaryClient> Dispatch for SummaryDispatcher<C> {
    type Request = SummaryRequest;
    type Response = C::Summary;

    async fn dispatch(&self, request: SummaryRequest) -> anyhow::Result<C::Summary> {
        debug!("Fetching {} summaries for {}", request.job_ids.len(), request.user_id);
        self.client.fetch_summaries(&request).await
    }

    /// An empty id list queues nothing
    fn split(&self, request: SummaryRequest) -> Vec<SummaryRequest> {
        request
            .job_ids
            .chunks(self.chunk_size)
            .map(|ids| SummaryRequest { user_id: request.user_id.clone(), job_ids: ids.to_vec() })
            .collect()
    }
}

impl<C: SummaryClient> RequestBatcher<SummaryDispatcher<C>> {
    /// Summary batcher built from its config section
    pub fn summaries(client: C, config: &SummaryConfig) -> Self {
        RequestBatcher::new(SummaryDispatcher::new(client, config.chunk_size), &config.batcher())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct EchoClient {
        seen: Mutex<Vec<SummaryRequest>>,
    }

    #[async_trait]
    impl SummaryClient for EchoClient {
        type Summary = Vec<String>;

        async fn fetch_summaries(&self, request: &SummaryRequest) -> anyhow::Result<Vec<String>> {
            self.seen.lock().push(request.clone());
            Ok(request.job_ids.iter().map(|id| format!("summary:{id}")).collect())
        }
    }

    fn job_ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("job-{i}")).collect()
    }

    #[test]
    fn test_split_into_chunks() {
        let dispatcher = SummaryDispatcher::new(EchoClient::default(), 5);
        let chunks = dispatcher.split(SummaryRequest::new("user", job_ids(12)));

        assert_eq!(chunks.iter().map(|c| c.job_ids.len()).collect::<Vec<_>>(), vec![5, 5, 2]);
        assert!(chunks.iter().all(|c| c.user_id == "user"));
        assert_eq!(chunks[2].job_ids, vec!["job-10", "job-11"]);

        assert!(dispatcher.split(SummaryRequest::new("user", Vec::<String>::new())).is_empty());
    }

    #[tokio::test]
    async fn test_summary_ticket_collects_every_chunk() {
        let batcher = RequestBatcher::summaries(EchoClient::default(), &SummaryConfig::default());
        let ticket = batcher.submit(SummaryRequest::new("user", job_ids(7)));
        assert_eq!(ticket.parts(), 2);
        assert_eq!(batcher.concurrency(), 1);

        assert_eq!(batcher.run_once().await, 1);
        assert_eq!(batcher.run_once().await, 1);

        let summaries: Vec<String> = ticket.wait().await.unwrap().into_iter().flatten().collect();
        assert_eq!(summaries.len(), 7);
        assert_eq!(summaries[6], "summary:job-6");
        assert_eq!(batcher.dispatcher().client().seen.lock().len(), 2);
    }
}
