//! End-to-end scenarios over complete combined files.

use std::fs;

use pod5_format::{
    recover_read_table, EndReason, EndReasonData, Pod5Error, Pod5Reader, Pod5Writer, PoreData,
    ReadData, RunInfoData, SignalType, WriterOptions,
};
use pretty_assertions::assert_eq;
use uuid::Uuid;

fn run_info(acquisition_id: &str) -> RunInfoData {
    RunInfoData {
        acquisition_id: acquisition_id.to_string(),
        acquisition_start_time_ms: 1_720_000_000_000,
        adc_max: 2047,
        adc_min: -2048,
        context_tags: vec![("sample_frequency".to_string(), "4000".to_string())],
        experiment_name: "roundtrip".to_string(),
        flow_cell_id: "FC0042".to_string(),
        flow_cell_product_code: "FLO-MIN114".to_string(),
        protocol_name: "sequencing/sequencing_MIN114".to_string(),
        protocol_run_id: "prot-1".to_string(),
        protocol_start_time_ms: 1_720_000_000_500,
        sample_id: "sample-a".to_string(),
        sample_rate: 4000,
        sequencing_kit: "SQK-LSK114".to_string(),
        sequencer_position: "MN12345".to_string(),
        sequencer_position_type: "MinION".to_string(),
        software: "pod5-format tests".to_string(),
        system_name: "test-rig".to_string(),
        system_type: "minion".to_string(),
        tracking_id: vec![("run_id".to_string(), acquisition_id.to_string())],
    }
}

struct Dictionary {
    pore_type: i16,
    end_reason: i16,
    run_info: i16,
}

fn populate_dictionaries<W: std::io::Write + std::io::Seek>(
    writer: &mut Pod5Writer<W>,
) -> eyre::Result<Dictionary> {
    Ok(Dictionary {
        pore_type: writer.add_pore_type("r10_4_1")?,
        end_reason: writer.add_end_reason(EndReason::SignalPositive)?,
        run_info: writer.add_run_info(&run_info("acq-1"))?,
    })
}

fn read_data(read_id: Uuid, read_number: u32, dictionary: &Dictionary) -> ReadData {
    ReadData {
        read_id,
        read_number,
        start_sample: read_number as u64 * 1000,
        median_before: 224.5,
        num_minknow_events: 52,
        tracked_scaling_scale: 1.1,
        tracked_scaling_shift: 0.3,
        predicted_scaling_scale: 1.05,
        predicted_scaling_shift: 0.28,
        num_reads_since_mux_change: read_number,
        time_since_mux_change: read_number as f32 * 0.5,
        channel: 77,
        well: 2,
        pore_type: dictionary.pore_type,
        calibration_offset: -264.0,
        calibration_scale: 0.1755,
        end_reason: dictionary.end_reason,
        end_reason_forced: false,
        run_info: dictionary.run_info,
    }
}

/// S1: a file with no reads and no signal parses back to empty tables.
#[test]
fn empty_file() -> eyre::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("a.pod5");

    let mut writer = Pod5Writer::create(&path, WriterOptions::default())?;
    let identifier = writer.file_identifier();
    writer.close()?;

    let mut reader = Pod5Reader::open_combined(&path)?;
    assert_eq!(reader.num_read_record_batches(), 0);
    assert_eq!(reader.num_signal_record_batches(), 0);
    assert_eq!(reader.file_identifier(), identifier);
    assert_eq!(reader.num_reads()?, 0);
    Ok(())
}

/// S2: uncompressed signal is chunked at the configured size and read back
/// bitwise.
#[test]
fn one_read_uncompressed() -> eyre::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("uncompressed.pod5");
    let samples = [0i16, 1, -1, i16::MAX, i16::MIN];

    let options = WriterOptions {
        signal_type: SignalType::UncompressedSignal,
        max_signal_chunk_size: 2,
        ..WriterOptions::default()
    };
    let mut writer = Pod5Writer::create(&path, options)?;
    let dictionary = populate_dictionaries(&mut writer)?;
    let read_id = Uuid::new_v4();
    writer.add_read(&read_data(read_id, 0, &dictionary), &samples)?;
    writer.close()?;

    let mut reader = Pod5Reader::open_combined(&path)?;
    assert_eq!(reader.signal_type(), SignalType::UncompressedSignal);
    let record = reader.read_record(0, 0)?;
    assert_eq!(record.read_id, read_id);
    assert_eq!(record.signal_rows, vec![0, 1, 2]);
    assert_eq!(record.num_samples, Some(5));
    for (row, expected) in record.signal_rows.iter().zip([2u64, 2, 1]) {
        assert_eq!(reader.extract_sample_count(&[*row])?, expected);
        assert_eq!(reader.signal_row_read_id(*row)?, read_id);
    }
    assert_eq!(reader.read_record_signal(&record)?, samples);
    Ok(())
}

/// S3: a constant run compresses through the VBZ path and decodes back.
#[test]
fn one_read_vbz() -> eyre::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("vbz.pod5");
    let samples = [100i16, 100, 100, 100];

    let mut writer = Pod5Writer::create(&path, WriterOptions::default())?;
    let dictionary = populate_dictionaries(&mut writer)?;
    let read_id = Uuid::new_v4();
    writer.add_read(&read_data(read_id, 0, &dictionary), &samples)?;
    writer.close()?;

    let mut reader = Pod5Reader::open_combined(&path)?;
    assert_eq!(reader.signal_type(), SignalType::VbzSignal);
    let record = reader.read_record(0, 0)?;
    assert_eq!(record.signal_rows.len(), 1);
    assert_eq!(reader.extract_sample_count(&record.signal_rows)?, 4);
    assert_eq!(reader.read_record_signal(&record)?, samples);
    Ok(())
}

/// S4: the traversal planner visits batches in order and maps hits back to
/// query positions.
#[test]
fn traversal_planner() -> eyre::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("plan.pod5");

    let u0 = Uuid::from_u128(0x1000);
    let u1 = Uuid::from_u128(0x2000);
    let u2 = Uuid::from_u128(0x3000);

    let options = WriterOptions {
        read_table_batch_size: 2,
        ..WriterOptions::default()
    };
    let mut writer = Pod5Writer::create(&path, options)?;
    let dictionary = populate_dictionaries(&mut writer)?;
    // Write order u1, u0, u2: batch 0 holds [u1, u0], batch 1 holds [u2].
    for (number, id) in [u1, u0, u2].into_iter().enumerate() {
        writer.add_read(&read_data(id, number as u32, &dictionary), &[1, 2, 3])?;
    }
    writer.close()?;

    let mut reader = Pod5Reader::open_combined(&path)?;
    assert_eq!(reader.num_read_record_batches(), 2);

    let plan = reader.plan_traversal(&[u2, u0, u1])?;
    assert_eq!(plan.find_success_count(), 3);
    assert_eq!(plan.missing_count(), 0);
    assert_eq!(plan.batch_counts(), &[2, 1]);

    let visits: Vec<(usize, usize, usize)> = plan
        .steps()
        .iter()
        .map(|step| (step.batch, step.batch_row, step.input_index))
        .collect();
    assert_eq!(visits, vec![(0, 0, 2), (0, 1, 1), (1, 0, 0)]);

    // Each planned row resolves to the queried id.
    let queried = [u2, u0, u1];
    for step in plan.steps() {
        let record = reader.read_record(step.batch, step.batch_row)?;
        assert_eq!(record.read_id, queried[step.input_index]);
    }

    // A missing id is counted but leaves no gap.
    let plan = reader.plan_traversal(&[u0, Uuid::from_u128(0xdead)])?;
    assert_eq!(plan.find_success_count(), 1);
    assert_eq!(plan.missing_count(), 1);
    Ok(())
}

/// S5: a signal table claiming a different file identifier fails to open.
#[test]
fn identifier_mismatch() -> eyre::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("mismatch.pod5");

    let mut writer = Pod5Writer::create(&path, WriterOptions::default())?;
    let identifier = writer.file_identifier();
    let dictionary = populate_dictionaries(&mut writer)?;
    writer.add_read(&read_data(Uuid::new_v4(), 0, &dictionary), &[5, 6, 7])?;
    writer.close()?;

    // The signal table is the first sub-file, so the first occurrence of the
    // identifier string is its schema metadata. Swap it for another uuid of
    // identical length.
    let mut bytes = fs::read(&path)?;
    let needle = identifier.to_string().into_bytes();
    let replacement = Uuid::new_v4().to_string().into_bytes();
    let position = bytes
        .windows(needle.len())
        .position(|window| window == needle)
        .expect("identifier present in signal schema");
    bytes[position..position + needle.len()].copy_from_slice(&replacement);

    match Pod5Reader::from_bytes(bytes).err() {
        Some(Pod5Error::ConsistencyError(_)) => {}
        other => panic!("expected a consistency error, got {other:?}"),
    }
    Ok(())
}

/// S6: a file truncated inside the read table recovers its complete batches.
#[test]
fn recovery_after_truncation() -> eyre::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("damaged.pod5");
    let dest = dir.path().join("recovered-reads.arrow");

    let options = WriterOptions {
        read_table_batch_size: 5,
        signal_table_batch_size: 5,
        ..WriterOptions::default()
    };
    let mut writer = Pod5Writer::create(&path, options)?;
    let dictionary = populate_dictionaries(&mut writer)?;
    for number in 0..50u32 {
        let samples: Vec<i16> = (0..256).map(|i| ((number as i32 * 7 + i) % 311) as i16).collect();
        writer.add_read(&read_data(Uuid::new_v4(), number, &dictionary), &samples)?;
    }
    writer.close()?;

    let reads_location = {
        let reader = Pod5Reader::open_combined(&path)?;
        reader.read_table_location().expect("combined file")
    };

    // Truncate midway through the read table: the footer is gone and the
    // last read batches are incomplete.
    let bytes = fs::read(&path)?;
    let cut = (reads_location.offset + reads_location.length / 2) as usize;
    fs::write(&path, &bytes[..cut])?;

    assert!(Pod5Reader::open_combined(&path).is_err());

    let recovered = recover_read_table(&path, &dest)?;
    assert!(recovered.recovered_batches >= 1);
    assert!(recovered.recovered_batches < 10);
    assert_eq!(recovered.recovered_rows, recovered.recovered_batches * 5);
    assert!(recovered.failed_batch_error.is_some());

    // Every recovered row is readable in the destination file.
    let mut dest_file = std::fs::File::open(&dest)?;
    let metadata = arrow2::io::ipc::read::read_file_metadata(&mut dest_file)?;
    let reader = arrow2::io::ipc::read::FileReader::new(dest_file, metadata, None, None);
    let mut rows = 0;
    for chunk in reader {
        rows += chunk?.len();
    }
    assert_eq!(rows, recovered.recovered_rows);
    Ok(())
}

/// A read with no samples produces no signal rows.
#[test]
fn zero_sample_read() -> eyre::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("empty-read.pod5");

    let mut writer = Pod5Writer::create(&path, WriterOptions::default())?;
    let dictionary = populate_dictionaries(&mut writer)?;
    let read_id = Uuid::new_v4();
    writer.add_read(&read_data(read_id, 0, &dictionary), &[])?;
    writer.close()?;

    let mut reader = Pod5Reader::open_combined(&path)?;
    let record = reader.read_record(0, 0)?;
    assert_eq!(record.read_id, read_id);
    assert!(record.signal_rows.is_empty());
    assert_eq!(record.num_samples, Some(0));
    assert_eq!(reader.read_record_signal(&record)?, Vec::<i16>::new());
    Ok(())
}

/// A read of N samples with chunk size k produces ceil(N/k) rows, all k
/// except possibly the last.
#[test]
fn chunk_boundaries() -> eyre::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("chunks.pod5");
    let samples: Vec<i16> = (0..10).collect();

    let options = WriterOptions {
        max_signal_chunk_size: 3,
        ..WriterOptions::default()
    };
    let mut writer = Pod5Writer::create(&path, options)?;
    let dictionary = populate_dictionaries(&mut writer)?;
    writer.add_read(&read_data(Uuid::new_v4(), 0, &dictionary), &samples)?;
    writer.close()?;

    let mut reader = Pod5Reader::open_combined(&path)?;
    let record = reader.read_record(0, 0)?;
    assert_eq!(record.signal_rows.len(), 4);
    let counts: Vec<u64> = record
        .signal_rows
        .iter()
        .map(|row| reader.extract_sample_count(&[*row]).unwrap())
        .collect();
    assert_eq!(counts, vec![3, 3, 3, 1]);
    assert_eq!(reader.read_record_signal(&record)?, samples);
    Ok(())
}

/// Full metadata round-trip over several reads and batches, including the
/// dictionary-referenced values and the run-info table.
#[test]
fn multi_read_roundtrip() -> eyre::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("multi.pod5");

    let options = WriterOptions {
        read_table_batch_size: 3,
        signal_table_batch_size: 4,
        max_signal_chunk_size: 100,
        ..WriterOptions::default()
    };
    let mut writer = Pod5Writer::create(&path, options)?;
    let first_run = writer.add_run_info(&run_info("acq-1"))?;
    let second_run = writer.add_run_info(&run_info("acq-2"))?;
    assert_eq!(writer.add_run_info(&run_info("acq-1"))?, first_run);
    let pore_type = writer.add_pore_type("r10_4_1")?;
    let forced_reason = writer.add_end_reason(EndReason::DataServiceUnblockMuxChange)?;

    let mut expected: Vec<(Uuid, Vec<i16>)> = Vec::new();
    for number in 0..8u32 {
        let read_id = Uuid::from_u128(0x4242_0000 + number as u128);
        let length = (number as usize * 97) % 450;
        let samples: Vec<i16> = (0..length)
            .map(|i| ((i as i64 * 13 - 200) % 1024) as i16)
            .collect();
        let read = ReadData {
            read_id,
            read_number: number,
            start_sample: number as u64 * 4000,
            median_before: 200.0 + number as f32,
            num_minknow_events: number as u64 * 3,
            tracked_scaling_scale: 1.0,
            tracked_scaling_shift: 0.1,
            predicted_scaling_scale: 1.2,
            predicted_scaling_shift: 0.2,
            num_reads_since_mux_change: number,
            time_since_mux_change: number as f32,
            channel: 100 + number as u16,
            well: (number % 4) as u8,
            pore_type,
            calibration_offset: -240.0,
            calibration_scale: 0.18,
            end_reason: forced_reason,
            end_reason_forced: true,
            run_info: if number % 2 == 0 { first_run } else { second_run },
        };
        writer.add_read(&read, &samples)?;
        expected.push((read_id, samples));
    }
    writer.close()?;

    let mut reader = Pod5Reader::open_combined(&path)?;
    assert_eq!(reader.num_reads()?, 8);
    assert_eq!(reader.num_read_record_batches(), 3);

    let mut seen = 0usize;
    for batch in 0..reader.num_read_record_batches() {
        for row in 0..reader.read_batch_num_rows(batch)? {
            let record = reader.read_record(batch, row)?;
            let (expected_id, expected_samples) = &expected[seen];
            assert_eq!(record.read_id, *expected_id);
            assert_eq!(record.num_samples, Some(expected_samples.len() as u64));
            assert_eq!(reader.read_record_signal(&record)?, *expected_samples);
            assert_eq!(record.pore, PoreData::new(100 + seen as u16, (seen % 4) as u8, "r10_4_1"));
            assert_eq!(
                record.end_reason,
                EndReasonData::new(EndReason::DataServiceUnblockMuxChange, true)
            );
            let expected_acq = if seen % 2 == 0 { "acq-1" } else { "acq-2" };
            assert_eq!(record.run_info.acquisition_id(), expected_acq);
            let resolved = reader.read_run_info(&record)?.expect("run info present");
            assert_eq!(resolved, run_info(expected_acq));
            seen += 1;
        }
    }
    assert_eq!(seen, 8);

    assert_eq!(reader.run_info("acq-2")?, Some(run_info("acq-2")));
    assert_eq!(reader.run_info("missing")?, None);
    Ok(())
}

/// Caller-compressed cells bypass recompression and read back identically.
#[test]
fn pre_compressed_signal() -> eyre::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("precompressed.pod5");
    let chunk_a: Vec<i16> = (0..300).map(|i| (i % 40) as i16 - 20).collect();
    let chunk_b: Vec<i16> = vec![-7; 128];

    let cell_a = pod5_format::compression::compress_signal(&chunk_a)?;
    let cell_b = pod5_format::compression::compress_signal(&chunk_b)?;

    let mut writer = Pod5Writer::create(&path, WriterOptions::default())?;
    let dictionary = populate_dictionaries(&mut writer)?;
    let read_id = Uuid::new_v4();
    writer.add_read_pre_compressed(
        &read_data(read_id, 0, &dictionary),
        &[&cell_a, &cell_b],
        &[chunk_a.len() as u32, chunk_b.len() as u32],
    )?;
    writer.close()?;

    let mut reader = Pod5Reader::open_combined(&path)?;
    let record = reader.read_record(0, 0)?;
    assert_eq!(record.signal_rows.len(), 2);
    assert_eq!(record.num_samples, Some(428));
    let mut all = chunk_a.clone();
    all.extend_from_slice(&chunk_b);
    assert_eq!(reader.read_record_signal(&record)?, all);
    Ok(())
}

/// Dictionary indices must refer to interned values.
#[test]
fn dangling_dictionary_index_rejected() -> eyre::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("dangling.pod5");

    let mut writer = Pod5Writer::create(&path, WriterOptions::default())?;
    let dictionary = populate_dictionaries(&mut writer)?;
    let mut read = read_data(Uuid::new_v4(), 0, &dictionary);
    read.pore_type = 9;
    match writer.add_read(&read, &[1, 2, 3]) {
        Err(Pod5Error::InvalidArgument(_)) => {}
        other => panic!("expected an invalid argument error, got {other:?}"),
    }
    Ok(())
}

/// The writer finishes the envelope when dropped without close.
#[test]
fn drop_closes_file() -> eyre::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("dropped.pod5");

    {
        let mut writer = Pod5Writer::create(&path, WriterOptions::default())?;
        let dictionary = populate_dictionaries(&mut writer)?;
        writer.add_read(&read_data(Uuid::new_v4(), 0, &dictionary), &[4, 5, 6])?;
    }

    let mut reader = Pod5Reader::open_combined(&path)?;
    assert_eq!(reader.num_reads()?, 1);
    Ok(())
}
