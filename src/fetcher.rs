use crate::error::{EngineError, Result};
use crate::models::Row;
use crate::remote::RemoteStore;

/// Read every row of a table, one page at a time
///
/// Stops at the first empty or short page.
pub async fn fetch_all_rows(remote: &dyn RemoteStore, table: &str, page_size: usize) -> Result<Vec<Row>> {
    let page_size = page_size.max(1);
    let mut rows = Vec::new();
    let mut offset = 0;

    loop {
        let page = remote
            .fetch_page(table, offset, page_size)
            .await
            .map_err(|source| EngineError::Fetch {
                table: table.to_string(),
                source,
            })?;
        let page_len = page.len();
        tracing::debug!("Fetched {} rows of {} at offset {}", page_len, table, offset);
        rows.extend(page);

        if page_len < page_size {
            break;
        }
        offset += page_size;
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryStore;
    use serde_json::json;

    fn seeded(count: usize) -> InMemoryStore {
        let store = InMemoryStore::new("id");
        store.set_table(
            "items",
            (0..count)
                .map(|i| json!({"id": i}).as_object().cloned().unwrap())
                .collect(),
        );
        store
    }

    #[tokio::test]
    async fn test_fetch_across_pages() {
        let store = seeded(25);
        let rows = fetch_all_rows(&store, "items", 10).await.unwrap();
        assert_eq!(rows.len(), 25);
        assert_eq!(store.fetch_calls(), 3);
    }

    #[tokio::test]
    async fn test_exact_multiple_needs_trailing_empty_page() {
        let store = seeded(20);
        let rows = fetch_all_rows(&store, "items", 10).await.unwrap();
        assert_eq!(rows.len(), 20);
        assert_eq!(store.fetch_calls(), 3);
    }

    #[tokio::test]
    async fn test_empty_table() {
        let store = seeded(0);
        assert!(fetch_all_rows(&store, "items", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_error_names_table() {
        let store = seeded(5);
        store.fail_fetches("items");
        let err = fetch_all_rows(&store, "items", 10).await.unwrap_err();
        assert!(matches!(err, EngineError::Fetch { ref table, .. } if table == "items"));
    }
}
