//! Scan driver: the packet loop, cancellation and progress reporting

use crossbeam::channel::{bounded, Receiver};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::capture::{CaptureEnd, CaptureFormat, CaptureReader};
use crate::decode::{decode_packet, DecodedPacket};
use crate::error::CaptureError;
use crate::extract::{build_extractors, Extraction, Extractor};
use crate::model::AnalysisResult;
use crate::options::AnalyzerOptions;

const PROGRESS_CHANNEL_CAPACITY: usize = 64;
const WORKER_THREAD_NAME: &str = "capture-scan";

/// Snapshot of a running scan
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Progress {
    /// Packets aggregated so far
    pub packets: u64,
    /// Bytes consumed from the input, header included
    pub bytes_read: u64,
    pub elapsed: Duration,
}

/// Single-pass capture analyzer
///
/// An `Analyzer` holds the options of a run and the extractors they enable. It can be reused
/// for several captures; each call produces an independent [`AnalysisResult`].
///
/// ## Example
///
/// ```rust
/// use pcap_forensics::{Analyzer, AnalyzerOptions};
/// # use pcap_forensics::CaptureError;
///
/// # fn run() -> Result<(), CaptureError> {
/// let analyzer = Analyzer::new(AnalyzerOptions::default());
/// let result = analyzer.analyze_file("capture.pcap")?;
/// for conn in &result.connections {
///     println!("{}:{} -> {}:{}", conn.src_ip, conn.src_port, conn.dst_ip, conn.dst_port);
/// }
/// # Ok(())
/// # }
/// ```
pub struct Analyzer {
    options: AnalyzerOptions,
    extractors: Vec<Box<dyn Extractor>>,
}

impl Analyzer {
    pub fn new(options: AnalyzerOptions) -> Analyzer {
        let extractors = build_extractors(&options);
        Analyzer {
            options,
            extractors,
        }
    }

    pub fn options(&self) -> &AnalyzerOptions {
        &self.options
    }

    /// Analyze a capture file
    pub fn analyze_file<P: AsRef<Path>>(&self, path: P) -> Result<AnalysisResult, CaptureError> {
        let never = AtomicBool::new(false);
        self.analyze_file_with(path, &never, |_| ())
    }

    /// Analyze a capture file, with cancellation and progress reports
    pub fn analyze_file_with<P, F>(
        &self,
        path: P,
        cancel: &AtomicBool,
        progress: F,
    ) -> Result<AnalysisResult, CaptureError>
    where
        P: AsRef<Path>,
        F: FnMut(&Progress),
    {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut result = self.analyze_reader_with(file, cancel, progress)?;
        result.source = Some(path.display().to_string());
        Ok(result)
    }

    /// Analyze capture data from any reader
    pub fn analyze_reader<R: Read>(&self, reader: R) -> Result<AnalysisResult, CaptureError> {
        let never = AtomicBool::new(false);
        self.analyze_reader_with(reader, &never, |_| ())
    }

    /// Analyze capture data from any reader, with cancellation and progress reports
    ///
    /// `cancel` is checked before each packet is read: once it is set, the scan stops and the
    /// result gathered so far is returned, with [`CaptureEnd::Cancelled`] as end reason.
    /// `progress` is called every `progress_interval` packets.
    ///
    /// Only an unreadable or unrecognized header is an error. Problems met later end the scan
    /// early or are recorded as notes in the result.
    pub fn analyze_reader_with<R, F>(
        &self,
        reader: R,
        cancel: &AtomicBool,
        mut progress: F,
    ) -> Result<AnalysisResult, CaptureError>
    where
        R: Read,
        F: FnMut(&Progress),
    {
        let start = Instant::now();
        let mut reader = CaptureReader::new(reader)?;
        let header = reader.header().clone();
        let mut result = AnalysisResult::new(header.clone(), self.options.max_errors);

        if header.format == CaptureFormat::BlockStructured {
            warn!("block-structured capture, reading packets on a best-effort basis");
            result.add_error(
                "block-structured (pcapng) capture: best-effort reading, block options ignored",
            );
        }
        if !header.network.is_supported() {
            warn!(linktype = %header.network, "unsupported link type");
            result.add_error(format!(
                "link type {} is not supported: packets are counted but not decoded",
                header.network
            ));
        }
        info!(
            format = ?header.format,
            linktype = %header.network,
            extractors = self.extractors.len(),
            "scan started"
        );

        let interval = self.options.progress_interval;
        let mut extractions = Vec::new();
        let end = loop {
            if cancel.load(Ordering::Relaxed) {
                break CaptureEnd::Cancelled;
            }
            if let Some(max) = self.options.max_packets {
                if result.total_packets >= max {
                    break CaptureEnd::PacketLimit;
                }
            }
            match reader.next_packet() {
                Ok(Some(packet)) => {
                    let decoded = decode_packet(packet.data, packet.linktype);
                    self.run_extractors(&decoded, &mut extractions);
                    result.fold_packet(&packet, &decoded, &extractions);
                }
                Ok(None) => break reader.end_reason().unwrap_or(CaptureEnd::Exhausted),
                Err(e) => {
                    warn!(packets = result.total_packets, error = %e, "read error");
                    result.add_error(format!(
                        "read error after {} packets: {}",
                        result.total_packets, e
                    ));
                    break CaptureEnd::ReadError;
                }
            }
            if interval > 0 && result.total_packets % interval == 0 {
                let report = Progress {
                    packets: result.total_packets,
                    bytes_read: reader.consumed() as u64,
                    elapsed: start.elapsed(),
                };
                info!(packets = report.packets, bytes = report.bytes_read, "scan progress");
                progress(&report);
            }
        };

        let invalid = reader.invalid_timestamps();
        if invalid > 0 {
            warn!(packets = invalid, "out-of-range timestamps");
            result.add_error(format!(
                "{} packets with out-of-range timestamps, recorded as 1970-01-01",
                invalid
            ));
        }
        match end {
            CaptureEnd::TruncatedRecord
            | CaptureEnd::OversizedRecord { .. }
            | CaptureEnd::MalformedBlock { .. } => {
                result.add_error(format!(
                    "capture ended early after {} packets: {}",
                    result.total_packets, end
                ));
            }
            _ => (),
        }
        result.end_reason = Some(end);
        info!(
            packets = result.total_packets,
            bytes = result.total_bytes,
            artifacts = result.artifacts.len(),
            connections = result.connections.len(),
            notes = result.errors.len() as u64 + result.errors_suppressed,
            end = %end,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "scan finished"
        );
        Ok(result)
    }

    fn run_extractors(&self, packet: &DecodedPacket, out: &mut Vec<Extraction>) {
        out.clear();
        for extractor in &self.extractors {
            if !extractor.applies_to(packet) {
                continue;
            }
            if let Some(extraction) = extractor.extract(packet) {
                debug!(extractor = extractor.name(), "extraction");
                out.push(extraction);
            }
        }
    }
}

/// Handle on a scan running in a background thread
pub struct AnalysisHandle {
    cancel: Arc<AtomicBool>,
    progress: Receiver<Progress>,
    worker: JoinHandle<Result<AnalysisResult, CaptureError>>,
}

impl AnalysisHandle {
    /// Ask the scan to stop; [`join`](AnalysisHandle::join) then returns the partial result
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Progress reports; reports are dropped when nobody reads them
    pub fn progress(&self) -> &Receiver<Progress> {
        &self.progress
    }

    /// Returns true once the scan has stopped
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for the scan to finish
    pub fn join(self) -> Result<AnalysisResult, CaptureError> {
        self.worker
            .join()
            .map_err(|_| CaptureError::WorkerPanicked)?
    }
}

/// Analyze a capture file in a background thread
///
/// The file is opened before the thread is started, so a missing or unreadable file is
/// reported immediately.
pub fn spawn_analysis<P: AsRef<Path>>(
    path: P,
    options: AnalyzerOptions,
) -> Result<AnalysisHandle, CaptureError> {
    let path = path.as_ref();
    let file = File::open(path)?;
    spawn_worker(file, Some(path.display().to_string()), options)
}

/// Analyze capture data from any reader in a background thread
pub fn spawn_reader_analysis<R>(
    reader: R,
    options: AnalyzerOptions,
) -> Result<AnalysisHandle, CaptureError>
where
    R: Read + Send + 'static,
{
    spawn_worker(reader, None, options)
}

fn spawn_worker<R>(
    reader: R,
    source: Option<String>,
    options: AnalyzerOptions,
) -> Result<AnalysisHandle, CaptureError>
where
    R: Read + Send + 'static,
{
    let cancel = Arc::new(AtomicBool::new(false));
    let (tx, rx) = bounded(PROGRESS_CHANNEL_CAPACITY);
    let flag = Arc::clone(&cancel);
    let worker = thread::Builder::new()
        .name(WORKER_THREAD_NAME.to_string())
        .spawn(move || -> Result<AnalysisResult, CaptureError> {
            let analyzer = Analyzer::new(options);
            let mut result = analyzer.analyze_reader_with(reader, &flag, |p| {
                // never block the scan on a slow consumer
                let _ = tx.try_send(*p);
            })?;
            result.source = source;
            Ok(result)
        })?;
    Ok(AnalysisHandle {
        cancel,
        progress: rx,
        worker,
    })
}
