//! JSON-path cursor pagination

use serde_json::Value;

use super::error::ClientError;
use super::rest::PageFetcher;

/// Resolve a dotted path with optional indexes, e.g. `payload.listens[0].listened_at`
pub fn json_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        let (key, indexes) = match segment.find('[') {
            Some(pos) => (&segment[..pos], &segment[pos..]),
            None => (segment, ""),
        };
        if !key.is_empty() {
            current = current.get(key)?;
        }
        for index in indexes.split('[').filter(|s| !s.is_empty()) {
            let index: usize = index.strip_suffix(']')?.parse().ok()?;
            current = current.get(index)?;
        }
    }
    Some(current)
}

/// Records selected from a page: an array fans out, anything else is one item
pub fn select_items(page: &Value, selector: &str) -> Vec<Value> {
    match json_path(page, selector) {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other.clone()],
    }
}

/// Reads the next cursor from each response and sends it as a query parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonCursorPaginator {
    cursor_path: String,
    cursor_param: String,
}

impl JsonCursorPaginator {
    pub fn new(cursor_path: impl Into<String>, cursor_param: impl Into<String>) -> Self {
        Self {
            cursor_path: cursor_path.into(),
            cursor_param: cursor_param.into(),
        }
    }

    pub fn cursor_param(&self) -> &str {
        &self.cursor_param
    }

    /// Next cursor as a parameter value, if the page carries one
    pub fn next_cursor(&self, page: &Value) -> Option<String> {
        match json_path(page, &self.cursor_path)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Fetch pages until the cursor disappears or stops changing.
    ///
    /// Pages are returned in fetch order.
    pub async fn fetch_all(
        &self,
        fetcher: &dyn PageFetcher,
        path: &str,
        mut params: Vec<(String, String)>,
    ) -> Result<Vec<Value>, ClientError> {
        let mut pages = Vec::new();

        loop {
            let page = fetcher.fetch(path, &params).await?;
            let next = self.next_cursor(&page);
            pages.push(page);

            let Some(next) = next else {
                break;
            };

            match params.iter_mut().find(|(k, _)| *k == self.cursor_param) {
                Some((_, current)) if *current == next => {
                    tracing::debug!(cursor = %next, "Cursor did not advance, stopping");
                    break;
                }
                Some((_, current)) => *current = next,
                None => params.push((self.cursor_param.clone(), next)),
            }
        }

        Ok(pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct ScriptedFetcher {
        pages: Mutex<Vec<Value>>,
        requests: Mutex<Vec<Vec<(String, String)>>>,
    }

    impl ScriptedFetcher {
        fn new(pages: Vec<Value>) -> Self {
            Self {
                pages: Mutex::new(pages),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PageFetcher for ScriptedFetcher {
        async fn fetch(
            &self,
            _path: &str,
            params: &[(String, String)],
        ) -> Result<Value, ClientError> {
            self.requests.lock().unwrap().push(params.to_vec());
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                Ok(json!({}))
            } else {
                Ok(pages.remove(0))
            }
        }
    }

    #[test]
    fn test_json_path() {
        let value = json!({"payload": {"listens": [{"listened_at": 5}, {"listened_at": 3}]}});
        assert_eq!(
            json_path(&value, "payload.listens[1].listened_at"),
            Some(&json!(3))
        );
        assert_eq!(json_path(&value, "payload.listens[2].listened_at"), None);
        assert_eq!(json_path(&value, "payload.missing"), None);
        assert_eq!(json_path(&value, "payload.listens[x]"), None);
    }

    #[test]
    fn test_select_items() {
        let page = json!({"payload": {"listens": [1, 2], "count": 2}});
        assert_eq!(select_items(&page, "payload.listens").len(), 2);
        assert_eq!(select_items(&page, "payload.count"), vec![json!(2)]);
        assert!(select_items(&page, "payload.none").is_empty());
    }

    #[tokio::test]
    async fn test_fetch_all_follows_cursor_until_absent() {
        let fetcher = ScriptedFetcher::new(vec![
            json!({"payload": {"listens": [{"listened_at": 20}]}}),
            json!({"payload": {"listens": [{"listened_at": 30}]}}),
            json!({"payload": {"listens": []}}),
        ]);
        let paginator = JsonCursorPaginator::new("payload.listens[0].listened_at", "min_ts");

        let pages = paginator
            .fetch_all(&fetcher, "listens", vec![("min_ts".into(), "10".into())])
            .await
            .unwrap();

        assert_eq!(pages.len(), 3);
        let requests = fetcher.requests.lock().unwrap();
        let min_ts: Vec<&str> = requests
            .iter()
            .map(|r| r.iter().find(|(k, _)| k == "min_ts").unwrap().1.as_str())
            .collect();
        assert_eq!(min_ts, vec!["10", "20", "30"]);
    }

    #[tokio::test]
    async fn test_fetch_all_stops_when_cursor_repeats() {
        let fetcher = ScriptedFetcher::new(vec![
            json!({"payload": {"listens": [{"listened_at": 20}]}}),
            json!({"payload": {"listens": [{"listened_at": 20}]}}),
            json!({"payload": {"listens": [{"listened_at": 20}]}}),
        ]);
        let paginator = JsonCursorPaginator::new("payload.listens[0].listened_at", "min_ts");

        let pages = paginator
            .fetch_all(&fetcher, "listens", vec![("min_ts".into(), "0".into())])
            .await
            .unwrap();

        assert_eq!(pages.len(), 2);
    }
}
