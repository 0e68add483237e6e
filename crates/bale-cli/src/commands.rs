//! Subcommand implementations.
//!
//! Each command writes its report to the given writer so it can be tested
//! without a terminal.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use tracing::{debug, info};

use bale_common::config::ControllerConfig;
use bale_common::types::{GroupId, InstanceId};
use bale_controller::{Envelope, RecordController};
use bale_record::ManagedHeader;
use bale_storage::{FileSource, StorageSource};

fn open(dir: &Path) -> Result<FileSource> {
    ensure!(dir.is_dir(), "{} is not a directory", dir.display());
    FileSource::open(dir).with_context(|| format!("failed to open {}", dir.display()))
}

fn instances(source: &FileSource, only: Option<u16>) -> Result<Vec<InstanceId>> {
    match only {
        Some(instance) => Ok(vec![InstanceId::new(instance)]),
        None => Ok(source.valid_ids()?),
    }
}

/// Decodes one instance file into its envelope and raw bytes.
fn read_envelope(source: &FileSource, instance: InstanceId) -> Result<(Envelope, Vec<u8>)> {
    let path = source.path_for(instance);
    let bytes = source
        .load(instance)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let envelope =
        Envelope::decode(&bytes).with_context(|| format!("bad envelope in {}", path.display()))?;
    ensure!(
        envelope.header.slot.instance == instance,
        "{} holds the envelope of instance {}",
        path.display(),
        envelope.header.slot.instance
    );
    Ok((envelope, bytes.to_vec()))
}

/// Prints envelope headers and one line per record.
pub fn inspect(dir: &Path, only: Option<u16>, out: &mut impl Write) -> Result<()> {
    let source = open(dir)?;
    for instance in instances(&source, only)? {
        let (envelope, bytes) = read_envelope(&source, instance)?;
        let header = envelope.header;
        writeln!(
            out,
            "{}: slot {} records {} root {} size {}",
            source.path_for(instance).display(),
            header.slot,
            header.record_count,
            header.root_reference,
            header.total_size
        )?;
        for (position, range) in envelope.records.iter().enumerate() {
            let record = ManagedHeader::from_bytes(&bytes[range.clone()])?;
            writeln!(
                out,
                "  [{position}] type {} ref {} class {} interface {} data {} slack {} total {}{}",
                record.record_type.as_u8(),
                record.reference_id,
                record.class_id,
                record.interface_id,
                record.data_length,
                record.buffer_length,
                record.total_length,
                if record.flags.is_empty() {
                    String::new()
                } else {
                    format!(" flags {:?}", record.flags)
                }
            )?;
        }
    }
    Ok(())
}

/// Checks every instance file; returns false if any failed.
pub fn verify(dir: &Path, out: &mut impl Write) -> Result<bool> {
    let source = open(dir)?;
    let mut failed = 0usize;
    let ids = source.valid_ids()?;
    for &instance in &ids {
        let path = source.path_for(instance);
        match read_envelope(&source, instance) {
            Ok((envelope, _)) => {
                debug!(path = %path.display(), records = envelope.records.len(), "verified");
                writeln!(out, "ok   {} ({} records)", path.display(), envelope.records.len())?;
            }
            Err(err) => {
                failed += 1;
                writeln!(out, "FAIL {}: {err:#}", path.display())?;
            }
        }
    }
    writeln!(out, "{} files, {} failed", ids.len(), failed)?;
    Ok(failed == 0)
}

/// Loads a directory into a controller and reports what was attached.
pub fn load(dir: &Path, group: u16, config: Option<&Path>, out: &mut impl Write) -> Result<()> {
    let config = match config {
        Some(path) => ControllerConfig::from_file(path)
            .with_context(|| format!("failed to read config {}", path.display()))?,
        None => ControllerConfig::default(),
    };
    let controller = RecordController::new(config)?;
    controller.add_source(GroupId::new(group), Arc::new(open(dir)?));

    let stats = controller.load_all_agents()?;
    info!(envelopes = stats.envelopes, agents = stats.added, "directory loaded");
    writeln!(out, "envelopes: {}", stats.envelopes)?;
    writeln!(out, "agents: {}", controller.agent_count())?;
    writeln!(out, "resident bytes: {}", controller.resident_bytes())?;
    if let Some(root) = controller.root() {
        writeln!(
            out,
            "root: reference {}",
            controller.agent(root)?.reference_id()?
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use bale_common::types::{ClassId, ReferenceId, StorageSlot};
    use bale_controller::envelope;
    use bale_record::{ManagedRecord, RecordType};
    use tempfile::TempDir;

    fn write_instance(dir: &Path, instance: u16, references: &[u16]) {
        let slot = StorageSlot::new(GroupId::new(0), InstanceId::new(instance));
        let records: Vec<Vec<u8>> = references
            .iter()
            .map(|&r| {
                ManagedRecord::builder(RecordType::new(6).unwrap())
                    .class(ClassId::new(2))
                    .storage(slot.group, slot.instance)
                    .reference(ReferenceId::new(r))
                    .data(vec![1, 2, 3])
                    .build()
                    .unwrap()
                    .into_bytes()
            })
            .collect();
        let bytes =
            envelope::encode(slot, ReferenceId::new(references[0]), records.iter().map(Vec::as_slice))
                .unwrap();
        FileSource::open(dir)
            .unwrap()
            .save(&bytes, 0, bytes.len(), slot.instance)
            .unwrap();
    }

    #[test]
    fn test_inspect_lists_records() {
        let dir = TempDir::new().unwrap();
        write_instance(dir.path(), 1, &[10, 11]);

        let mut out = Vec::new();
        inspect(dir.path(), None, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("records 2 root 10"));
        assert!(text.contains("[1] type 6 ref 11 class 2"));
    }

    #[test]
    fn test_verify_flags_corrupt_file() {
        let dir = TempDir::new().unwrap();
        write_instance(dir.path(), 1, &[10]);
        write_instance(dir.path(), 2, &[20]);

        let mut out = Vec::new();
        assert!(verify(dir.path(), &mut out).unwrap());

        let path = FileSource::open(dir.path()).unwrap().path_for(InstanceId::new(2));
        let mut bytes = fs::read(&path).unwrap();
        bytes[3] ^= 0x01;
        fs::write(&path, bytes).unwrap();

        let mut out = Vec::new();
        assert!(!verify(dir.path(), &mut out).unwrap());
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("2 files, 1 failed"));
    }

    #[test]
    fn test_load_reports_agents() {
        let dir = TempDir::new().unwrap();
        write_instance(dir.path(), 0, &[1, 2]);
        write_instance(dir.path(), 1, &[3]);

        let mut out = Vec::new();
        load(dir.path(), 0, None, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("envelopes: 2"));
        assert!(text.contains("agents: 3"));
        assert!(text.contains("root: reference 1"));
    }

    #[test]
    fn test_missing_directory() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(inspect(&missing, None, &mut Vec::new()).is_err());
    }
}
