use super::frame::StreamSource;

/// Reassembles frame payloads into text lines, keeping one partial-line
/// buffer per stream source.
#[derive(Debug, Default)]
pub struct LineAssembler {
    // Ordered by when each fragment was started.
    pending: Vec<(StreamSource, Vec<u8>)>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns the lines it completed, in order.
    /// Lines split on `\n` or `\r`; empty lines are dropped.
    pub fn push(&mut self, source: StreamSource, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|b| *b == b'\n' || *b == b'\r') {
            let mut line = self.take(source);
            line.extend_from_slice(&rest[..pos]);
            if !line.is_empty() {
                lines.push(String::from_utf8_lossy(&line).into_owned());
            }
            rest = &rest[pos + 1..];
        }
        if !rest.is_empty() {
            self.fragment(source).extend_from_slice(rest);
        }
        lines
    }

    /// Flushes unterminated fragments as final lines.
    pub fn finish(&mut self) -> Vec<String> {
        self.pending
            .drain(..)
            .filter(|(_, bytes)| !bytes.is_empty())
            .map(|(_, bytes)| String::from_utf8_lossy(&bytes).into_owned())
            .collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    fn take(&mut self, source: StreamSource) -> Vec<u8> {
        match self.pending.iter().position(|(s, _)| *s == source) {
            Some(index) => self.pending.remove(index).1,
            None => Vec::new(),
        }
    }

    fn fragment(&mut self, source: StreamSource) -> &mut Vec<u8> {
        let index = match self.pending.iter().position(|(s, _)| *s == source) {
            Some(index) => index,
            None => {
                self.pending.push((source, Vec::new()));
                self.pending.len() - 1
            }
        };
        &mut self.pending[index].1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "2024-01-01T00:00:00Z ready\r\nnaïve café line\n\npartial";

    fn collect(chunks: &[&[u8]]) -> Vec<String> {
        let mut assembler = LineAssembler::new();
        let mut lines = Vec::new();
        for chunk in chunks {
            lines.extend(assembler.push(StreamSource::Stdout, chunk));
        }
        lines.extend(assembler.finish());
        lines
    }

    #[test]
    fn holds_partial_line_until_newline() {
        let mut assembler = LineAssembler::new();
        assert!(assembler.push(StreamSource::Stdout, b"hello").is_empty());
        assert!(assembler.has_pending());
        assert_eq!(assembler.push(StreamSource::Stdout, b"\n"), vec!["hello".to_string()]);
        assert!(!assembler.has_pending());
    }

    #[test]
    fn any_split_point_yields_the_same_lines() {
        let bytes = SAMPLE.as_bytes();
        let whole = collect(&[bytes]);
        assert_eq!(
            whole,
            vec![
                "2024-01-01T00:00:00Z ready".to_string(),
                "naïve café line".to_string(),
                "partial".to_string(),
            ]
        );

        for split in 0..=bytes.len() {
            let (a, b) = bytes.split_at(split);
            assert_eq!(collect(&[a, b]), whole, "split at byte {split}");
        }

        let single_bytes: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(collect(&single_bytes), whole);
        let triples: Vec<&[u8]> = bytes.chunks(3).collect();
        assert_eq!(collect(&triples), whole);
    }

    #[test]
    fn sources_keep_independent_fragments() {
        let mut assembler = LineAssembler::new();
        assert!(assembler.push(StreamSource::Stdout, b"out-").is_empty());
        assert!(assembler.push(StreamSource::Stderr, b"err-").is_empty());
        assert_eq!(
            assembler.push(StreamSource::Stderr, b"done\n"),
            vec!["err-done".to_string()]
        );
        assert!(assembler.push(StreamSource::Stderr, b"tail").is_empty());
        // Stdout's fragment was started first.
        assert_eq!(
            assembler.finish(),
            vec!["out-".to_string(), "tail".to_string()]
        );
    }
}
