use anyhow::{Context, anyhow};
use backflow::StreamSource;
use futures::{Stream, StreamExt, future};
use serde_json::Value;
use std::{path::Path, pin::Pin};
use tokio::io::AsyncRead;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

/// Longest accepted input line. Longer lines fail the run.
const MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

pub type Reader = Box<dyn AsyncRead + Send + Unpin>;

pub type Items = Pin<Box<dyn Stream<Item = anyhow::Result<Value>> + Send>>;

/// Opens `path`, or stdin when `None`.
pub async fn open(path: Option<&Path>) -> anyhow::Result<Reader> {
    match path {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open input `{}`", path.display()))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdin())),
    }
}

/// One JSON object per line. Blank lines are skipped; anything else that is
/// not an object ends the run with an error naming the line.
pub fn ndjson<R>(reader: R) -> StreamSource<Items>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let items = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_BYTES))
        .enumerate()
        .filter_map(|(index, line)| future::ready(parse_line(index + 1, line)));
    StreamSource::new(Box::pin(items))
}

fn parse_line(
    number: usize,
    line: Result<String, LinesCodecError>,
) -> Option<anyhow::Result<Value>> {
    let line = match line {
        Ok(line) => line,
        Err(err) => return Some(Err(anyhow!("line {number}: {err}"))),
    };
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(match serde_json::from_str::<Value>(trimmed) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(_) => Err(anyhow!("line {number}: expected a JSON object")),
        Err(err) => Err(anyhow!("line {number}: {err}")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use backflow::{Error, Source, SourceError};
    use serde_json::json;

    async fn collect(input: &'static str) -> Vec<Result<Value, SourceError>> {
        let mut source = ndjson(input.as_bytes());
        let mut out = Vec::new();
        while let Some(event) = source.next().await {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn reads_objects_and_skips_blank_lines() {
        let items = collect("{\"id\":1}\n\n  \n{\"id\":2}\r\n").await;
        assert_eq!(items, vec![Ok(json!({ "id": 1 })), Ok(json!({ "id": 2 }))]);
    }

    #[tokio::test]
    async fn non_objects_are_errors() {
        let items = collect("{\"id\":1}\n[1,2]\n").await;
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[1],
            Err(SourceError::new("line 2: expected a JSON object"))
        );
    }

    #[tokio::test]
    async fn malformed_json_names_the_line() {
        let items = collect("{\"id\":\n").await;
        let Err(err) = &items[0] else {
            panic!("expected an error, got {items:?}");
        };
        assert!(err.message().starts_with("line 1:"), "{err}");
        assert!(matches!(Error::from(err.clone()), Error::Source(_)));
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let result = open(Some(Path::new("/nonexistent/items.ndjson"))).await;
        let Err(err) = result else {
            panic!("expected an error");
        };
        assert!(err.to_string().contains("/nonexistent/items.ndjson"));
    }
}
