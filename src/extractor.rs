use std::sync::Arc;

use crate::dataset::Dataset;
use crate::datastore::PageSource;
use crate::observer::{PipelineEvent, PipelineObserver};

pub const DEFAULT_PAGE_SIZE: u64 = 50_000;
const PROBE_LIMIT: u64 = 1;

#[derive(Debug)]
pub enum Extraction {
    Complete(Dataset),
    /// A page failed; rows fetched before it are kept.
    Partial {
        dataset: Dataset,
        failed_offset: u64,
        reason: String,
    },
    /// The probe failed, so nothing is known about the resource.
    Failed { reason: String },
}

pub struct Extractor {
    source: Arc<dyn PageSource>,
    page_size: u64,
}

impl Extractor {
    pub fn new(source: Arc<dyn PageSource>, page_size: u64) -> Self {
        Self {
            source,
            page_size: page_size.max(1),
        }
    }

    pub async fn extract(&self, resource_id: &str, observer: &dyn PipelineObserver) -> Extraction {
        let total = match self.source.fetch_page(resource_id, PROBE_LIMIT, 0).await {
            Ok(probe) => probe.total,
            Err(error) => {
                observer.on_event(&PipelineEvent::ExtractionFailed {
                    resource_id,
                    error: &error,
                });
                return Extraction::Failed {
                    reason: error.to_string(),
                };
            }
        };
        observer.on_event(&PipelineEvent::ExtractionStarted { resource_id, total });

        let mut dataset = Dataset::default();
        let mut offset = 0;
        while offset < total {
            match self
                .source
                .fetch_page(resource_id, self.page_size, offset)
                .await
            {
                Ok(page) => {
                    observer.on_event(&PipelineEvent::PageFetched {
                        resource_id,
                        offset,
                        rows: page.records.len(),
                    });
                    dataset.extend_records(&page.records);
                }
                Err(error) => {
                    observer.on_event(&PipelineEvent::PageFailed {
                        resource_id,
                        offset,
                        error: &error,
                    });
                    return Extraction::Partial {
                        dataset,
                        failed_offset: offset,
                        reason: error.to_string(),
                    };
                }
            }
            offset += self.page_size;
        }

        observer.on_event(&PipelineEvent::Extracted {
            resource_id,
            rows: dataset.len(),
        });
        Extraction::Complete(dataset)
    }
}
