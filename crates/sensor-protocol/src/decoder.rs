//! Streaming Record Decoder
//!
//! TCP delivers a byte stream, so one readiness event may carry half a record
//! or several records at once. The decoder keeps the unfinished tail between
//! reads.

use crate::record::SensorRecord;
use crate::wire::RECORD_LEN;

/// Reassembles fixed-width records from arbitrary byte chunks
#[derive(Debug, Default)]
pub struct RecordDecoder {
    pending: Vec<u8>,
}

impl RecordDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self {
            pending: Vec::with_capacity(RECORD_LEN * 4),
        }
    }

    /// Append freshly read bytes
    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Pop the next complete record, if any
    pub fn next_record(&mut self) -> Option<SensorRecord> {
        if self.pending.len() < RECORD_LEN {
            return None;
        }
        let record = SensorRecord::from_bytes(&self.pending[..RECORD_LEN]).ok();
        self.pending.drain(..RECORD_LEN);
        record
    }

    /// Drain every complete record currently buffered
    pub fn drain_records(&mut self) -> Vec<SensorRecord> {
        let mut records = Vec::with_capacity(self.pending.len() / RECORD_LEN);
        while let Some(record) = self.next_record() {
            records.push(record);
        }
        records
    }

    /// Bytes of an unfinished record
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stream(records: &[SensorRecord]) -> Vec<u8> {
        records.iter().flat_map(|r| r.to_bytes()).collect()
    }

    #[test]
    fn test_partial_record_waits() {
        let record = SensorRecord::new(7, 18.25, 1_700_000_000);
        let bytes = record.to_bytes();
        let mut decoder = RecordDecoder::new();

        decoder.extend(&bytes[..10]);
        assert!(decoder.next_record().is_none());
        assert_eq!(decoder.buffered(), 10);

        decoder.extend(&bytes[10..]);
        assert_eq!(decoder.next_record(), Some(record));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_multiple_records_in_one_read() {
        let records = vec![
            SensorRecord::new(1, 21.5, 1000),
            SensorRecord::new(1, 22.0, 1001),
            SensorRecord::new(2, 15.0, 1002),
        ];
        let mut bytes = stream(&records);
        bytes.extend_from_slice(&[0xAB; 5]);

        let mut decoder = RecordDecoder::new();
        decoder.extend(&bytes);

        assert_eq!(decoder.drain_records(), records);
        assert_eq!(decoder.buffered(), 5);
    }

    proptest! {
        #[test]
        fn chunking_does_not_change_records(
            values in prop::collection::vec((any::<u16>(), -50.0f64..150.0, any::<i64>()), 1..20),
            chunk in 1usize..40,
        ) {
            let records: Vec<_> = values
                .iter()
                .map(|&(id, value, ts)| SensorRecord::new(id, value, ts))
                .collect();
            let bytes = stream(&records);

            let mut decoder = RecordDecoder::new();
            let mut decoded = Vec::new();
            for piece in bytes.chunks(chunk) {
                decoder.extend(piece);
                decoded.extend(decoder.drain_records());
            }

            prop_assert_eq!(decoded, records);
            prop_assert_eq!(decoder.buffered(), 0);
        }
    }
}
