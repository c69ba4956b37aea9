use crate::invoker::{AgentInvoker, InvocationRequest};
use async_trait::async_trait;
use maestro_core::MaestroResult;
use std::sync::Arc;

/// Multi-source search capability used by the deep research pipeline.
///
/// Same failure contract as [`AgentInvoker`]: async, may fail, may be slow.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Search one `source` for `query` and return findings as text.
    async fn search(&self, source: &str, query: &str) -> MaestroResult<String>;
}

/// Search implemented by asking a `searcher:<source>` agent.
pub struct AgentSearch {
    invoker: Arc<dyn AgentInvoker>,
}

impl AgentSearch {
    /// Route searches through `invoker`.
    pub fn new(invoker: Arc<dyn AgentInvoker>) -> Self {
        Self { invoker }
    }

    /// Role name used for a source.
    pub fn role_for(source: &str) -> String {
        format!("searcher:{source}")
    }
}

#[async_trait]
impl SearchProvider for AgentSearch {
    async fn search(&self, source: &str, query: &str) -> MaestroResult<String> {
        let request = InvocationRequest::new(
            Self::role_for(source),
            format!("Search the {source} source and report relevant findings.\n\nQuery: {query}"),
        )
        .with_system_prompt(format!(
            "You are a research assistant restricted to the '{source}' source. \
             Report findings as concise bullet points with their origin."
        ))
        .with_tools(vec![format!("{source}_search")]);

        self.invoker.invoke(&request).await
    }
}
