//! Property tests for key extraction and the indexing pipeline.

use std::io::Cursor;

use microblob::{Entry, EntryWriter, Indexer, KeyExtractor, PipelineConfig, Result};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Collect(Vec<Entry>);

impl EntryWriter for Collect {
    fn write_entries(&mut self, entries: &[Entry]) -> Result<()> {
        self.0.extend_from_slice(entries);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

fn arb_records() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z0-9 ]{0,40}", 0..200).prop_map(|payloads| {
        payloads
            .into_iter()
            .enumerate()
            .map(|(i, p)| format!("{{\"id\":\"k{i}\",\"v\":\"{p}\"}}\n"))
            .collect()
    })
}

fn arb_record_bytes() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        "[a-z]{1,8}".prop_map(|k| format!("{{\"id\":\"ai-49-{k}\",\"n\":1}}").into_bytes()),
        (any::<i64>(), any::<f64>())
            .prop_map(|(i, f)| format!("{{\"id\":{i},\"f\":{f:?}}}").into_bytes()),
        prop::collection::vec(any::<u8>(), 0..80),
    ]
}

fn run(input: &str, config: PipelineConfig, start: u64) -> Vec<Entry> {
    let extractor = KeyExtractor::field("id");
    let mut out = Collect::default();
    Indexer::new(&extractor, config)
        .with_start_offset(start)
        .run(Cursor::new(input.as_bytes()), &mut out)
        .unwrap();
    let mut entries = out.0;
    entries.sort_by_key(|e| e.offset);
    entries
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn offsets_tile_the_input(records in arb_records(), batch in 1usize..64, workers in 1usize..6) {
        let input = records.concat();
        let config = PipelineConfig::default().with_batch_size(batch).with_workers(workers);
        let entries = run(&input, config, 0);

        prop_assert_eq!(entries.len(), records.len());
        let mut expected = 0u64;
        for (entry, record) in entries.iter().zip(&records) {
            prop_assert_eq!(entry.offset, expected);
            prop_assert_eq!(entry.length, record.len() as u64);
            expected += entry.length;
        }
        prop_assert_eq!(expected, input.len() as u64);
    }

    #[test]
    fn parallel_matches_sequential(records in arb_records(), batch in 1usize..32) {
        let input = records.concat();
        let parallel = run(&input, PipelineConfig::default().with_batch_size(batch), 0);
        let sequential = run(&input, PipelineConfig::sequential(), 0);
        prop_assert_eq!(parallel, sequential);
    }

    #[test]
    fn start_offset_shifts_every_entry(records in arb_records(), start in 0u64..1_000_000) {
        let input = records.concat();
        let base = run(&input, PipelineConfig::default(), 0);
        let shifted = run(&input, PipelineConfig::default(), start);
        prop_assert_eq!(base.len(), shifted.len());
        for (a, b) in base.iter().zip(&shifted) {
            prop_assert_eq!(&a.key, &b.key);
            prop_assert_eq!(a.offset + start, b.offset);
            prop_assert_eq!(a.length, b.length);
        }
    }

    #[test]
    fn extraction_is_deterministic(record in arb_record_bytes()) {
        for extractor in [KeyExtractor::default(), KeyExtractor::field("id")] {
            let first = extractor.extract(&record).map_err(|e| e.code());
            let second = extractor.extract(&record).map_err(|e| e.code());
            prop_assert_eq!(first, second);
        }
    }
}
