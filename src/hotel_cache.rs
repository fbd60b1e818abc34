// Hotel static data cache
// Downloads the provider's bulk dump, decompresses it, and indexes one JSON record per line.
// Population runs at most once concurrently; reads after that are lock-free.

use crate::config::DumpConfig;
use crate::models::HotelRecord;
use crate::provider::InventoryProvider;
use crate::supplier::WireHotelInfo;
use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum DumpError {
    #[error("Dump download failed: {0}")]
    Download(String),

    #[error("Dump decompression failed: {0}")]
    Decompress(String),

    #[error("Dump indexing failed: {0}")]
    Index(String),

    #[error("Dump marker could not be written: {0}")]
    Marker(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePhase {
    Empty,
    Downloading,
    Decompressing,
    Indexing,
    Ready,
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub loads: AtomicUsize,
    pub downloads: AtomicUsize,
    pub records: AtomicUsize,
    pub skipped_lines: AtomicUsize,
    pub hit_count: AtomicUsize,
    pub miss_count: AtomicUsize,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct CacheStatsReport {
    pub loads: usize,
    pub downloads: usize,
    pub records: usize,
    pub skipped_lines: usize,
    pub hit_count: usize,
    pub miss_count: usize,
}

// Persisted next to the dump so restarts within the refresh window skip the download
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpMarker {
    pub last_fetched: DateTime<Utc>,
    pub compressed_bytes: u64,
}

impl DumpMarker {
    pub fn is_fresh(&self, max_age: chrono::Duration) -> bool {
        Utc::now() - self.last_fetched < max_age
    }
}

// Where the compressed dump comes from
#[async_trait]
pub trait DumpSource: Send + Sync + 'static {
    // Writes the compressed dump to `destination`, returning the byte count
    async fn download(&self, destination: &Path) -> anyhow::Result<u64>;
}

// Asks the provider for a signed URL, then streams the payload to disk
pub struct ProviderDumpSource {
    provider: Arc<dyn InventoryProvider>,
    http: reqwest::Client,
    language: String,
}

impl ProviderDumpSource {
    pub fn new(provider: Arc<dyn InventoryProvider>, language: impl Into<String>) -> Self {
        Self {
            provider,
            http: reqwest::Client::new(),
            language: language.into(),
        }
    }
}

#[async_trait]
impl DumpSource for ProviderDumpSource {
    async fn download(&self, destination: &Path) -> anyhow::Result<u64> {
        let url = self
            .provider
            .dump_url(&self.language)
            .await
            .context("requesting dump url")?;

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("fetching dump")?
            .error_for_status()
            .context("dump download rejected")?;

        let partial = destination.with_extension("part");
        let mut file = tokio::fs::File::create(&partial)
            .await
            .with_context(|| format!("creating {}", partial.display()))?;

        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk: Bytes = chunk.context("reading dump stream")?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&partial, destination)
            .await
            .with_context(|| format!("moving dump to {}", destination.display()))?;
        Ok(written)
    }
}

#[derive(Debug, Default)]
pub struct DumpParse {
    pub records: Vec<HotelRecord>,
    pub skipped: usize,
}

// Parses one record per line; malformed lines are counted and skipped
pub fn parse_dump<R: BufRead>(mut reader: R) -> std::io::Result<DumpParse> {
    let mut parsed = DumpParse::default();
    let mut line = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<WireHotelInfo>(&line)
            .ok()
            .and_then(WireHotelInfo::into_record)
        {
            Some(record) => parsed.records.push(record),
            None => parsed.skipped += 1,
        }
    }

    Ok(parsed)
}

fn decompress_file(source: &Path, destination: &Path) -> anyhow::Result<u64> {
    let input = std::fs::File::open(source)
        .with_context(|| format!("opening {}", source.display()))?;
    let mut decoder = zstd::stream::read::Decoder::new(input).context("initializing zstd decoder")?;

    let partial = destination.with_extension("part");
    let mut writer = BufWriter::new(
        std::fs::File::create(&partial)
            .with_context(|| format!("creating {}", partial.display()))?,
    );
    let written = std::io::copy(&mut decoder, &mut writer).context("decoding dump")?;
    writer.flush()?;
    drop(writer);

    std::fs::rename(&partial, destination)?;
    Ok(written)
}

fn index_file(path: &Path) -> anyhow::Result<DumpParse> {
    let file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    parse_dump(BufReader::new(file)).context("reading dump lines")
}

pub struct HotelDataCache {
    config: DumpConfig,
    source: Arc<dyn DumpSource>,
    index: DashMap<String, Arc<HotelRecord>>,
    load_lock: tokio::sync::Mutex<()>,
    // Set only once the index is fully populated
    ready: AtomicBool,
    lazy_attempted: AtomicBool,
    phase: RwLock<CachePhase>,
    stats: CacheStats,
}

impl HotelDataCache {
    pub fn new(config: DumpConfig, source: Arc<dyn DumpSource>) -> Self {
        Self {
            config,
            source,
            index: DashMap::new(),
            load_lock: tokio::sync::Mutex::new(()),
            ready: AtomicBool::new(false),
            lazy_attempted: AtomicBool::new(false),
            phase: RwLock::new(CachePhase::Empty),
            stats: CacheStats::default(),
        }
    }

    // Downloads through the provider's signed dump URL in the configured language
    pub fn from_provider(config: DumpConfig, provider: Arc<dyn InventoryProvider>) -> Self {
        let source = ProviderDumpSource::new(provider, config.language.clone());
        Self::new(config, Arc::new(source))
    }

    pub fn phase(&self) -> CachePhase {
        *self.phase.read()
    }

    pub fn record_count(&self) -> usize {
        self.stats.records.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> CacheStatsReport {
        CacheStatsReport {
            loads: self.stats.loads.load(Ordering::SeqCst),
            downloads: self.stats.downloads.load(Ordering::SeqCst),
            records: self.stats.records.load(Ordering::SeqCst),
            skipped_lines: self.stats.skipped_lines.load(Ordering::SeqCst),
            hit_count: self.stats.hit_count.load(Ordering::SeqCst),
            miss_count: self.stats.miss_count.load(Ordering::SeqCst),
        }
    }

    // No-op once populated; otherwise runs the pipeline under the single-flight guard
    pub async fn ensure_loaded(&self) -> Result<usize, DumpError> {
        if self.is_ready() {
            return Ok(self.record_count());
        }

        let _guard = self.load_lock.lock().await;
        if self.is_ready() {
            return Ok(self.record_count());
        }
        self.load_locked().await
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    // Absence is normal: it means no enrichment, never an error
    pub async fn lookup(&self, id: &str) -> Option<Arc<HotelRecord>> {
        self.lazy_load().await;

        match self.index.get(id) {
            Some(record) => {
                self.stats.hit_count.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(record.value()))
            }
            None => {
                self.stats.miss_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    // Drops the in-memory index; the next load honours the on-disk marker again
    pub async fn invalidate(&self) -> usize {
        let _guard = self.load_lock.lock().await;
        let dropped = self.record_count();
        self.ready.store(false, Ordering::Release);
        self.index.clear();
        self.stats.records.store(0, Ordering::SeqCst);
        self.lazy_attempted.store(false, Ordering::SeqCst);
        self.set_phase(CachePhase::Empty);
        dropped
    }

    // Indexes each record under its primary id and, when present, its numeric id
    pub fn insert_records(&self, records: Vec<HotelRecord>) -> usize {
        let mut inserted = 0;
        for record in records {
            let record = Arc::new(record);
            if let Some(hid) = record.hid {
                self.index.insert(hid.to_string(), Arc::clone(&record));
            }
            if self.index.insert(record.id.clone(), record).is_none() {
                inserted += 1;
            }
        }
        self.stats.records.fetch_add(inserted, Ordering::SeqCst);
        if !self.index.is_empty() {
            self.ready.store(true, Ordering::Release);
        }
        inserted
    }

    // Only the first lookup in the process (or after invalidate) triggers a load
    async fn lazy_load(&self) {
        if self.lazy_attempted.load(Ordering::Acquire) {
            return;
        }

        let _guard = self.load_lock.lock().await;
        if self.lazy_attempted.swap(true, Ordering::AcqRel) || self.is_ready() {
            return;
        }
        if let Err(e) = self.load_locked().await {
            warn!(error = %e, "hotel dump unavailable, continuing without enrichment");
        }
    }

    fn set_phase(&self, phase: CachePhase) {
        debug!(?phase, "hotel dump cache phase");
        *self.phase.write() = phase;
    }

    // Caller must hold `load_lock`
    async fn load_locked(&self) -> Result<usize, DumpError> {
        let started = Instant::now();
        self.stats.loads.fetch_add(1, Ordering::SeqCst);

        match self.populate().await {
            Ok(count) => {
                self.ready.store(true, Ordering::Release);
                self.set_phase(CachePhase::Ready);
                info!(
                    records = count,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "hotel dump indexed"
                );
                Ok(count)
            }
            Err(e) => {
                self.set_phase(CachePhase::Empty);
                warn!(error = %e, "hotel dump load failed");
                Err(e)
            }
        }
    }

    async fn populate(&self) -> Result<usize, DumpError> {
        let decompressed = self.config.decompressed_path();

        if self.has_fresh_local_copy().await {
            info!(path = %decompressed.display(), "indexing hotel dump from disk");
        } else {
            self.refresh_local_copy().await?;
        }

        self.set_phase(CachePhase::Indexing);
        let parsed = run_blocking(move || index_file(&decompressed))
            .await
            .map_err(|e| DumpError::Index(format!("{:#}", e)))?;

        if parsed.skipped > 0 {
            warn!(skipped = parsed.skipped, "skipped malformed dump lines");
        }
        self.stats
            .skipped_lines
            .fetch_add(parsed.skipped, Ordering::SeqCst);
        Ok(self.insert_records(parsed.records))
    }

    async fn refresh_local_copy(&self) -> Result<(), DumpError> {
        let compressed = self.config.compressed_path();
        let decompressed = self.config.decompressed_path();

        self.set_phase(CachePhase::Downloading);
        tokio::fs::create_dir_all(&self.config.data_dir)
            .await
            .map_err(|e| DumpError::Download(e.to_string()))?;
        let compressed_bytes = self
            .source
            .download(&compressed)
            .await
            .map_err(|e| DumpError::Download(format!("{:#}", e)))?;
        self.stats.downloads.fetch_add(1, Ordering::SeqCst);
        info!(bytes = compressed_bytes, "hotel dump downloaded");

        self.set_phase(CachePhase::Decompressing);
        let decompressed_bytes = run_blocking(move || decompress_file(&compressed, &decompressed))
            .await
            .map_err(|e| DumpError::Decompress(format!("{:#}", e)))?;
        debug!(bytes = decompressed_bytes, "hotel dump decompressed");

        let marker = DumpMarker {
            last_fetched: Utc::now(),
            compressed_bytes,
        };
        self.write_marker(&marker)
            .await
            .map_err(|e| DumpError::Marker(format!("{:#}", e)))
    }

    async fn has_fresh_local_copy(&self) -> bool {
        if !tokio::fs::try_exists(self.config.decompressed_path())
            .await
            .unwrap_or(false)
        {
            return false;
        }
        match self.read_marker().await {
            Ok(marker) => marker.is_fresh(self.config.max_age),
            Err(e) => {
                debug!(error = %e, "no usable dump marker");
                false
            }
        }
    }

    async fn read_marker(&self) -> anyhow::Result<DumpMarker> {
        let raw = tokio::fs::read(self.config.marker_path()).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn write_marker(&self, marker: &DumpMarker) -> anyhow::Result<()> {
        let raw = serde_json::to_vec_pretty(marker)?;
        tokio::fs::write(self.config.marker_path(), raw).await?;
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.config.data_dir.clone()
    }
}

async fn run_blocking<T, F>(job: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .context("blocking task panicked")?
}
