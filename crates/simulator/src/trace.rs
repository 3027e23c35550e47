//! Trace files and replay
//!
//! A captured trace interleaves stimuli (transport events and application
//! reports) with the primitives the device issued for each. Replay feeds the
//! stimuli into a fresh session and checks that it issues the same
//! primitives in the same order.

use crate::assembly::build_session;
use crate::config::SimulatorConfig;
use anyhow::{Context, Result, bail};
use protocol::integrity::{IntegrityResult, check_sequence};
use protocol::{TraceEntry, TraceRecord, TransportOp, read_all, write_all};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{debug, info, warn};

pub fn save_trace(path: &Path, records: &[TraceRecord]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create trace directory: {}", parent.display()))?;
    }

    let file = File::create(path)
        .with_context(|| format!("Failed to create trace file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    write_all(&mut writer, records)
        .with_context(|| format!("Failed to write trace file: {}", path.display()))?;
    writer.flush()?;

    info!("Wrote {} trace records to {}", records.len(), path.display());
    Ok(())
}

pub fn load_trace(path: &Path) -> Result<Vec<TraceRecord>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open trace file: {}", path.display()))?;
    let records = read_all(&mut BufReader::new(file))
        .with_context(|| format!("Failed to read trace file: {}", path.display()))?;

    let mut previous = None;
    for record in &records {
        if let IntegrityResult::SequenceGap { expected, received } =
            check_sequence(previous, record.sequence)
        {
            bail!(
                "Trace file {} skips from record #{} to #{}",
                path.display(),
                expected,
                received
            );
        }
        previous = Some(record.sequence);
    }
    debug!("Loaded {} trace records from {}", records.len(), path.display());
    Ok(records)
}

/// First point where the replayed session disagreed with the trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    /// Sequence number of the stimulus whose response differed
    pub stimulus: u64,
    /// Position within that stimulus's response
    pub position: usize,
    pub expected: Option<TransportOp>,
    pub actual: Option<TransportOp>,
}

impl fmt::Display for Divergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "after stimulus #{}, primitive {}: expected {:?}, got {:?}",
            self.stimulus, self.position, self.expected, self.actual
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub stimuli: usize,
    pub ops: usize,
    pub divergence: Option<Divergence>,
}

impl ReplayReport {
    pub fn is_faithful(&self) -> bool {
        self.divergence.is_none()
    }
}

/// One stimulus and the primitives recorded right after it
struct Step<'a> {
    stimulus: &'a TraceRecord,
    expected: Vec<&'a TransportOp>,
}

fn steps(records: &[TraceRecord]) -> Vec<Step<'_>> {
    let mut steps: Vec<Step<'_>> = Vec::new();
    for record in records {
        match &record.entry {
            TraceEntry::Op(op) => match steps.last_mut() {
                Some(step) => step.expected.push(op),
                None => warn!("Trace record #{} precedes any stimulus", record.sequence),
            },
            _ => steps.push(Step {
                stimulus: record,
                expected: Vec::new(),
            }),
        }
    }
    steps
}

/// Feed the recorded stimuli into a fresh session and compare its output
///
/// Stops at the first divergence.
pub fn replay(config: &SimulatorConfig, records: &[TraceRecord]) -> Result<ReplayReport> {
    let mut session = build_session(config, None)?;
    let mut report = ReplayReport::default();

    for step in steps(records) {
        report.stimuli += 1;
        match &step.stimulus.entry {
            TraceEntry::Event(event) => session.handle_event(event),
            TraceEntry::Report { interface, data } => {
                if let Err(e) = session.send_report(*interface, data) {
                    debug!("Replayed report on interface {} refused: {}", interface, e);
                }
            }
            TraceEntry::Op(_) => {}
        }

        let actual = session.port_mut().take_ops();
        let len = actual.len().max(step.expected.len());
        for position in 0..len {
            let expected = step.expected.get(position).copied();
            let produced = actual.get(position);
            if expected != produced {
                let divergence = Divergence {
                    stimulus: step.stimulus.sequence,
                    position,
                    expected: expected.cloned(),
                    actual: produced.cloned(),
                };
                warn!("Replay diverged {}", divergence);
                report.divergence = Some(divergence);
                return Ok(report);
            }
        }
        report.ops += actual.len();
    }

    info!(
        "Replayed {} stimuli and {} primitives without divergence",
        report.stimuli, report.ops
    );
    Ok(report)
}
