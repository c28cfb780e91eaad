/// Source Reader
///
/// Streams raw CSV records into the worker channel. The CSV decoder reuses a
/// single record buffer, so every record is copied before publication; the
/// send blocks when the channel is full (backpressure) and observes
/// cancellation while blocked.
use std::io::{BufReader, Read};
use std::sync::atomic::Ordering;
use std::time::Instant;

use csv::{StringRecord, Trim};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::ingest::pipeline::IngestStats;
use crate::ingest::READER_BUF;
use crate::repository::JobRepository;

/// Read all records from `input` and publish a copy of each to `rows`.
///
/// The first record is the header and is discarded; an unreadable (or
/// absent) header marks the job failed and aborts the stream. Single-record
/// decode errors are logged and skipped. Returns the number of records
/// published; `stats.rows` carries the same count, updated per record for
/// progress reporting.
pub(crate) async fn read_records<R: Read>(
    input: R,
    rows: async_channel::Sender<Vec<String>>,
    jobs: &JobRepository,
    job_id: &str,
    stats: &IngestStats,
    cancel: &CancellationToken,
) -> i64 {
    let buf_reader = BufReader::with_capacity(READER_BUF, input);
    let mut csv_reader =
        csv::ReaderBuilder::new().has_headers(false).flexible(true).trim(Trim::All).from_reader(buf_reader);

    let started = Instant::now();
    let mut record = StringRecord::new();
    let mut count: i64 = 0;

    // the first record is the header; a file without one is unusable
    match csv_reader.read_record(&mut record) {
        Ok(true) => {}
        Ok(false) => {
            error!(job_id = %job_id, "csv input is empty, no header record");
            jobs.set_failed(job_id, "failed to read csv header: empty input").await;
            return 0;
        }
        Err(e) => {
            error!(job_id = %job_id, error = %e, "failed to read csv header");
            jobs.set_failed(job_id, &format!("failed to read csv header: {e}")).await;
            return 0;
        }
    }

    loop {
        if cancel.is_cancelled() {
            return count;
        }

        match csv_reader.read_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                warn!(job_id = %job_id, line = count + 1, error = %e, "error reading csv line");
                continue;
            }
        }

        // the decoder reuses its backing storage; the copy hands exclusive
        // ownership of the record to whichever worker pulls it
        let copy: Vec<String> = record.iter().map(str::to_string).collect();

        tokio::select! {
            _ = cancel.cancelled() => return count,
            sent = rows.send(copy) => {
                if sent.is_err() {
                    return count;
                }
                count += 1;
                stats.rows.fetch_add(1, Ordering::Relaxed);
            }
        }

        if count % 10_000 == 0 {
            info!(job_id = %job_id, rows_read = count, elapsed = ?started.elapsed(), "csv reading progress");
        }
    }

    info!(job_id = %job_id, total_rows = count, duration = ?started.elapsed(), "csv reading completed");

    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::parse_row;

    async fn collect(
        input: &'static str,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (i64, Vec<Vec<String>>, IngestStats) {
        let (tx, rx) = async_channel::bounded(capacity);
        let jobs = JobRepository::disconnected();
        let stats = IngestStats::default();

        let count = read_records(input.as_bytes(), tx, &jobs, "job-1", &stats, &cancel).await;

        let mut received = Vec::new();
        while let Ok(rec) = rx.try_recv() {
            received.push(rec);
        }
        (count, received, stats)
    }

    #[tokio::test]
    async fn test_skips_header_and_counts_records() {
        let input = "order_id,product_id,customer_id\nO1,P1,C1\nO2,P2,C2\n";

        let (count, received, stats) = collect(input, 16, CancellationToken::new()).await;

        assert_eq!(count, 2);
        assert_eq!(stats.rows(), 2);
        assert_eq!(received.len(), 2);
        assert_eq!(received[0], vec!["O1", "P1", "C1"]);
    }

    #[tokio::test]
    async fn test_trims_leading_whitespace() {
        let input = "h1,h2,h3\n  O1,  P1,C1\n";

        let (_, received, _) = collect(input, 16, CancellationToken::new()).await;

        assert_eq!(received[0], vec!["O1", "P1", "C1"]);
    }

    #[tokio::test]
    async fn test_empty_input_returns_zero() {
        let (count, received, stats) = collect("", 16, CancellationToken::new()).await;

        assert_eq!(count, 0);
        assert!(received.is_empty());
        assert_eq!(stats.rows(), 0);
    }

    #[tokio::test]
    async fn test_bad_record_is_skipped() {
        // an invalid UTF-8 byte fails the record decode; the stream continues
        let (tx, rx) = async_channel::bounded(16);
        let jobs = JobRepository::disconnected();
        let stats = IngestStats::default();

        let mut input: Vec<u8> = b"h1,h2\nO1,P1\n".to_vec();
        input.extend_from_slice(&[0xFF, 0xFE, b',', b'x', b'\n']);
        input.extend_from_slice(b"O2,P2\n");

        let count =
            read_records(input.as_slice(), tx, &jobs, "job-1", &stats, &CancellationToken::new()).await;

        assert_eq!(count, 2);
        let mut received = Vec::new();
        while let Ok(rec) = rx.try_recv() {
            received.push(rec);
        }
        assert_eq!(received, vec![vec!["O1", "P1"], vec!["O2", "P2"]]);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_blocked_send() {
        let input = "h1,h2\nO1,P1\nO2,P2\nO3,P3\n";
        let (tx, rx) = async_channel::bounded(1);
        let jobs = JobRepository::disconnected();
        let stats = IngestStats::default();
        let cancel = CancellationToken::new();

        let reader = tokio::spawn({
            let cancel = cancel.clone();
            async move { read_records(input.as_bytes(), tx, &jobs, "job-1", &stats, &cancel).await }
        });

        // nobody consumes: the reader fills the one-slot buffer and blocks
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();

        let count = reader.await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(rx.len(), 1);
    }

    #[tokio::test]
    async fn test_records_round_trip_through_decoder() {
        let input = "header,row,here\nO1,P1,C1,Widget,Tools,NA,2024-03-15,2,10.00,0.10,5.00,,Alice,a@x,1 Main\n";

        let (_, received, _) = collect(input, 16, CancellationToken::new()).await;

        let sale = parse_row(&received[0]).unwrap();
        assert_eq!(sale.order_id, "O1");
        assert!((sale.order_total - 23.0).abs() < 1e-9);
    }
}
