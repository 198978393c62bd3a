//! Concurrent batch characterization.

use std::sync::Arc;

use filescope::{
    BatchEntry, BatchReport, FsSourceConfig, ScrapeRequest, Scraper, SourceError,
    SourceErrorKind, characterize_fs, discover,
};
use tokio::sync::Semaphore;

/// Characterize every discovered file, at most `jobs` at a time.
///
/// Results keep discovery order regardless of completion order.
pub async fn characterize_concurrently(
    scraper: Arc<Scraper>,
    fs_config: &FsSourceConfig,
    template: &ScrapeRequest,
    jobs: usize,
) -> anyhow::Result<BatchReport> {
    if jobs <= 1 {
        return characterize_fs(&scraper, fs_config, template);
    }

    let (files, mut source_errors) = discover(fs_config)?;
    tracing::info!(files = files.len(), jobs, "starting batch");

    let semaphore = Arc::new(Semaphore::new(jobs));
    let mut handles = Vec::with_capacity(files.len());
    for file in files {
        let permit = Arc::clone(&semaphore).acquire_owned().await?;
        let scraper = Arc::clone(&scraper);
        let request = template.with_path(file.clone());
        let handle = tokio::task::spawn_blocking(move || {
            let result = scraper.characterize(&request);
            drop(permit);
            result
        });
        handles.push((file, handle));
    }

    let mut results = Vec::with_capacity(handles.len());
    for (file, handle) in handles {
        match handle.await {
            Ok(Ok(result)) => results.push(BatchEntry { file, result }),
            Ok(Err(violation)) => source_errors.push(SourceError::new(
                file,
                SourceErrorKind::ContractViolation,
                violation.to_string(),
            )),
            Err(join_err) => source_errors.push(SourceError::new(
                file,
                SourceErrorKind::ContractViolation,
                format!("Characterization task failed: {join_err}"),
            )),
        }
    }

    Ok(BatchReport::new(results, source_errors))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use filescope::{Registry, ToolConfig, WellFormed};
    use std::fs;

    fn scraper() -> Arc<Scraper> {
        Arc::new(Scraper::new(Arc::new(Registry::new(&ToolConfig::default()))))
    }

    #[tokio::test]
    async fn test_concurrent_matches_sequential() {
        let tmp = tempfile::tempdir().unwrap();
        for n in 0_u32..6 {
            let body = if n.is_multiple_of(2) { "{\"n\": 1}" } else { "{\"n\": " };
            fs::write(tmp.path().join(format!("{n}.json")), body).unwrap();
        }
        let mut fs_config = FsSourceConfig::default();
        fs_config.paths = vec![tmp.path().to_path_buf()];
        let template = ScrapeRequest::new("");

        let sequential = characterize_concurrently(scraper(), &fs_config, &template, 1)
            .await
            .unwrap();
        let concurrent = characterize_concurrently(scraper(), &fs_config, &template, 3)
            .await
            .unwrap();

        assert_eq!(concurrent.characterized_files, 6);
        assert_eq!(concurrent.not_well_formed(), 3);
        let files = |report: &BatchReport| -> Vec<_> {
            report.results.iter().map(|e| e.file.clone()).collect()
        };
        assert_eq!(files(&sequential), files(&concurrent));
        assert_eq!(concurrent.results[1].result.well_formed, WellFormed::False);
    }
}
