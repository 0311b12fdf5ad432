//! Native provider: raw profiler payloads reconciled at report time.
//!
//! Executions hand over their raw per-script coverage as-is; nothing is
//! resolved while tests are still running. Reconciliation happens once,
//! at report time, with the transform registry and reconciler the caller
//! passes in, so a registry that keeps filling during the run is consulted
//! at its most complete.

use super::{
    finalize, CoverageProvider, CoveragePayload, ExecutionMeta, ExecutionOrigin, ProviderContext,
    ReportContext,
};
use crate::aggregate::{Aggregator, CoverageBatch, UrlRewriteRule};
use crate::config::ResolvedCoverageOptions;
use crate::result::CubrirResult;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Provider backed by the runtime's precise-coverage profiler
pub struct NativeProvider {
    context: ProviderContext,
    aggregator: Aggregator,
    pending: Mutex<Vec<ExecutionMeta>>,
}

impl NativeProvider {
    /// Provider bound to a run context
    #[must_use]
    pub fn new(context: ProviderContext) -> Self {
        Self {
            context,
            aggregator: Aggregator::new(),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Stop accepting executions, e.g. on user interrupt
    pub fn cancel(&self) {
        self.aggregator.cancel();
    }
}

impl std::fmt::Debug for NativeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeProvider")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CoverageProvider for NativeProvider {
    fn name(&self) -> &'static str {
        "native"
    }

    fn options(&self) -> &ResolvedCoverageOptions {
        &self.context.options
    }

    async fn initialize(&self) -> CubrirResult<()> {
        self.aggregator.reset().await;
        self.pending.lock().await.clear();
        Ok(())
    }

    async fn on_execution_complete(&self, meta: ExecutionMeta) -> CubrirResult<()> {
        if self.aggregator.is_cancelled() {
            warn!(batch = %meta.batch_id, "run cancelled, dropping raw coverage");
            return Ok(());
        }
        if let ExecutionOrigin::ServedPage { ref origin } = meta.origin {
            self.aggregator
                .add_rewrite(UrlRewriteRule::new(
                    origin.clone(),
                    self.context.options.root.display().to_string(),
                ))
                .await;
        }
        debug!(batch = %meta.batch_id, "buffering raw coverage");
        self.pending.lock().await.push(meta);
        Ok(())
    }

    async fn report_coverage(&self, context: ReportContext) -> CubrirResult<()> {
        let pending = std::mem::take(&mut *self.pending.lock().await);
        for meta in pending {
            let CoveragePayload::Native(scripts) = meta.payload else {
                warn!(
                    batch = %meta.batch_id,
                    "instrumentation payload offered to the native provider, dropping"
                );
                continue;
            };

            let mut entries = Vec::with_capacity(scripts.len());
            for raw in &scripts {
                let entry = context.reconciler.reconcile(raw, &context.registry)?;
                if !entry.is_empty() {
                    entries.push(entry);
                }
            }
            self.aggregator
                .merge_batch(CoverageBatch::new(meta.batch_id, entries))
                .await?;
        }

        finalize(&self.context, &self.aggregator, context.all_tests_run).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve_options, CoverageOptions};
    use crate::reconcile::Reconciler;
    use crate::script::{CoverageRange, FunctionCoverage, RawScriptCoverage};
    use crate::sourcemap::SourceMap;
    use crate::transform::{TransformRecord, TransformRegistry};
    use crate::wrapping::HarnessWrapping;
    use std::path::Path;

    fn provider(root: &Path) -> NativeProvider {
        let options = CoverageOptions {
            enabled: true,
            provider: Some("native".to_string()),
            reporter: vec!["json-summary".to_string()],
            ..CoverageOptions::default()
        };
        NativeProvider::new(ProviderContext {
            options: resolve_options(&options, root).unwrap(),
            config_path: None,
        })
    }

    fn raw(url: &str, start: u32, end: u32, count: u64) -> RawScriptCoverage {
        RawScriptCoverage {
            script_id: "1".to_string(),
            url: url.to_string(),
            functions: vec![FunctionCoverage {
                function_name: "run".to_string(),
                ranges: vec![CoverageRange {
                    start_offset: start,
                    end_offset: end,
                    count,
                }],
                is_block_coverage: false,
            }],
        }
    }

    /// Registry with one wrapped two-line transform mapping onto itself
    fn registry(path: &str) -> TransformRegistry {
        let code = "const a = 1\nconst b = 2\n";
        let map = SourceMap::identity(2);
        let mut registry = TransformRegistry::new();
        registry.insert(TransformRecord::new(path, code).with_source_map(map));
        registry
    }

    #[tokio::test]
    async fn raw_batches_survive_until_report_time() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("cubrir=debug")
            .with_test_writer()
            .try_init();

        let dir = tempfile::tempdir().unwrap();
        let provider = provider(dir.path());
        let wrapper = HarnessWrapping::node_vm().offset() as u32;

        provider
            .on_execution_complete(ExecutionMeta {
                batch_id: "w1".to_string(),
                origin: ExecutionOrigin::Process,
                payload: CoveragePayload::Native(vec![raw(
                    "file:///src/app.ts",
                    wrapper,
                    wrapper + 11,
                    2,
                )]),
            })
            .await
            .unwrap();

        provider
            .report_coverage(ReportContext {
                all_tests_run: true,
                registry: registry("/src/app.ts"),
                reconciler: Reconciler::default(),
            })
            .await
            .unwrap();

        let summary = std::fs::read_to_string(
            provider.options().reports_directory.join("coverage-summary.json"),
        )
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&summary).unwrap();
        assert_eq!(value["/src/app.ts"]["lines"]["covered"], 1);
    }

    #[tokio::test]
    async fn executions_after_cancel_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(dir.path());
        provider.cancel();

        provider
            .on_execution_complete(ExecutionMeta {
                batch_id: "late".to_string(),
                origin: ExecutionOrigin::Process,
                payload: CoveragePayload::Native(vec![raw("file:///src/app.ts", 185, 196, 1)]),
            })
            .await
            .unwrap();
        assert!(provider.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn initialize_clears_previous_run_state() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(dir.path());
        provider
            .on_execution_complete(ExecutionMeta {
                batch_id: "w1".to_string(),
                origin: ExecutionOrigin::Process,
                payload: CoveragePayload::Native(vec![raw("file:///src/app.ts", 185, 196, 1)]),
            })
            .await
            .unwrap();

        provider.initialize().await.unwrap();
        assert!(provider.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn foreign_payload_kind_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(dir.path());
        provider
            .on_execution_complete(ExecutionMeta {
                batch_id: "w1".to_string(),
                origin: ExecutionOrigin::Process,
                payload: CoveragePayload::Instrumentation(
                    crate::provider::InstrumentationSnapshot::default(),
                ),
            })
            .await
            .unwrap();

        // Report generation drops the mismatched payload without failing.
        provider
            .report_coverage(ReportContext {
                all_tests_run: true,
                registry: TransformRegistry::new(),
                reconciler: Reconciler::new(HarnessWrapping::none()),
            })
            .await
            .unwrap();
    }
}
