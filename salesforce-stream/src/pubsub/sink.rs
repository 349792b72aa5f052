use super::codec::Record;
use super::replay::ReplayId;
use std::io::{self, Write};

/// Destination for decoded records.
///
/// A sink error is fatal for the subscription.
pub trait RecordSink {
    /// Writes one record. The checkpoint advances to `replay_id` only after
    /// this returns `Ok`.
    fn emit(&mut self, record: &Record, replay_id: &ReplayId) -> io::Result<()>;
}

impl<S: RecordSink + ?Sized> RecordSink for &mut S {
    fn emit(&mut self, record: &Record, replay_id: &ReplayId) -> io::Result<()> {
        (**self).emit(record, replay_id)
    }
}

/// Writes every record as one line of JSON.
#[derive(Debug)]
pub struct JsonLines<W> {
    writer: W,
}

impl<W: Write> JsonLines<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Consumes the sink and returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonLines<io::Stdout> {
    /// Line-delimited JSON on standard output.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> RecordSink for JsonLines<W> {
    fn emit(&mut self, record: &Record, _replay_id: &ReplayId) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_lines_one_record_per_line() {
        let mut sink = JsonLines::new(Vec::new());
        let first = json!({"Name": "Acme"});
        let second = json!({"Name": "Globex"});
        sink.emit(first.as_object().unwrap(), &ReplayId::new(vec![1]))
            .unwrap();
        sink.emit(second.as_object().unwrap(), &ReplayId::new(vec![2]))
            .unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(output, "{\"Name\":\"Acme\"}\n{\"Name\":\"Globex\"}\n");
    }
}
