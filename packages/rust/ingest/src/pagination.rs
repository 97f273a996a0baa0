//! Page-fetching protocols.
//!
//! A [`PaginationStrategy`] builds the query of each request and decides,
//! from the decoded response envelope, whether another page follows. The end
//! of a collection is [`NextPage::EndOfCollection`], never an error.

use lakeflow_shared::{LakeflowError, Result};
use serde_json::Value;
use url::Url;

/// Position inside a paginated collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageToken {
    /// 1-based page number.
    Number(u32),
    /// Opaque cursor; `None` for the first request.
    Cursor(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationState {
    pub token: PageToken,
    pub page_size: u32,
    /// Set by the collector once the collection ended.
    pub finished: bool,
}

/// Outcome of inspecting one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextPage {
    Fetch(PaginationState),
    EndOfCollection,
}

pub trait PaginationStrategy: Send + Sync {
    fn initial(&self, page_size: u32) -> PaginationState;

    /// Query parameters of the request for `state`.
    fn query(&self, state: &PaginationState) -> Vec<(String, String)>;

    /// Decide what follows the page that was fetched with `state`.
    /// `items` is the number of items the page carried.
    fn next(&self, state: &PaginationState, envelope: &Value, items: usize) -> Result<NextPage>;
}

// ---------------------------------------------------------------------------
// Offset paging
// ---------------------------------------------------------------------------

/// How an offset collection knows it is done.
#[derive(Debug, Clone)]
pub enum PageTotal {
    /// The envelope reports the total item count at this JSON pointer.
    Reported(String),
    /// Keep going until a page comes back empty.
    UntilEmpty,
}

/// Page-number paging: `page=<n>&pagelen=<size>` style.
#[derive(Debug, Clone)]
pub struct OffsetPagination {
    page_param: String,
    size_param: String,
    total: PageTotal,
    extra: Vec<(String, String)>,
}

impl OffsetPagination {
    pub fn new(page_param: &str, size_param: &str, total: PageTotal) -> Self {
        Self {
            page_param: page_param.into(),
            size_param: size_param.into(),
            total,
            extra: Vec::new(),
        }
    }

    /// Add a fixed query parameter sent with every request.
    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.extra.push((key.into(), value.into()));
        self
    }
}

impl PaginationStrategy for OffsetPagination {
    fn initial(&self, page_size: u32) -> PaginationState {
        PaginationState {
            token: PageToken::Number(1),
            page_size,
            finished: false,
        }
    }

    fn query(&self, state: &PaginationState) -> Vec<(String, String)> {
        let mut query = self.extra.clone();
        if let PageToken::Number(page) = state.token {
            query.push((self.page_param.clone(), page.to_string()));
        }
        query.push((self.size_param.clone(), state.page_size.to_string()));
        query
    }

    fn next(&self, state: &PaginationState, envelope: &Value, items: usize) -> Result<NextPage> {
        let PageToken::Number(page) = state.token else {
            return Err(LakeflowError::validation(
                "offset pagination received a cursor state",
            ));
        };
        if items == 0 {
            return Ok(NextPage::EndOfCollection);
        }

        if let PageTotal::Reported(pointer) = &self.total {
            let total = envelope
                .pointer(pointer)
                .and_then(Value::as_u64)
                .ok_or_else(|| {
                    LakeflowError::decode(
                        "pagination envelope",
                        format!("missing numeric total at `{pointer}`"),
                    )
                })?;
            let page_size = u64::from(state.page_size.max(1));
            let pages = total.div_ceil(page_size);
            if u64::from(page) >= pages {
                return Ok(NextPage::EndOfCollection);
            }
        }

        Ok(NextPage::Fetch(PaginationState {
            token: PageToken::Number(page + 1),
            ..state.clone()
        }))
    }
}

// ---------------------------------------------------------------------------
// Cursor paging
// ---------------------------------------------------------------------------

/// Cursor paging driven by a `next` link embedded in each response.
///
/// The cursor of the following request is the `token_param` query value of
/// that link.
#[derive(Debug, Clone)]
pub struct CursorPagination {
    next_pointer: String,
    token_param: String,
    size_param: String,
    extra: Vec<(String, String)>,
}

impl CursorPagination {
    pub fn new(next_pointer: &str, token_param: &str, size_param: &str) -> Self {
        Self {
            next_pointer: next_pointer.into(),
            token_param: token_param.into(),
            size_param: size_param.into(),
            extra: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.extra.push((key.into(), value.into()));
        self
    }
}

impl PaginationStrategy for CursorPagination {
    fn initial(&self, page_size: u32) -> PaginationState {
        PaginationState {
            token: PageToken::Cursor(None),
            page_size,
            finished: false,
        }
    }

    fn query(&self, state: &PaginationState) -> Vec<(String, String)> {
        let mut query = self.extra.clone();
        query.push((self.size_param.clone(), state.page_size.to_string()));
        if let PageToken::Cursor(Some(token)) = &state.token {
            query.push((self.token_param.clone(), token.clone()));
        }
        query
    }

    fn next(&self, state: &PaginationState, envelope: &Value, _items: usize) -> Result<NextPage> {
        let link = match envelope.pointer(&self.next_pointer) {
            None | Some(Value::Null) => return Ok(NextPage::EndOfCollection),
            Some(Value::String(link)) if link.is_empty() => return Ok(NextPage::EndOfCollection),
            Some(Value::String(link)) => link,
            Some(other) => {
                return Err(LakeflowError::decode(
                    "pagination envelope",
                    format!("`{}` is not a link: {other}", self.next_pointer),
                ));
            }
        };

        let url = Url::parse(link).map_err(|e| {
            LakeflowError::decode("pagination envelope", format!("next link `{link}`: {e}"))
        })?;
        let token = url
            .query_pairs()
            .find(|(key, _)| key == self.token_param.as_str())
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| {
                LakeflowError::decode(
                    "pagination envelope",
                    format!("next link `{link}` has no `{}` parameter", self.token_param),
                )
            })?;

        Ok(NextPage::Fetch(PaginationState {
            token: PageToken::Cursor(Some(token)),
            ..state.clone()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn offset_reported_total_stops_after_last_page() {
        let strategy = OffsetPagination::new("page", "pagelen", PageTotal::Reported("/size".into()))
            .with_param("state", "all");
        let mut state = strategy.initial(20);
        assert_eq!(
            strategy.query(&state),
            vec![
                ("state".to_string(), "all".to_string()),
                ("page".to_string(), "1".to_string()),
                ("pagelen".to_string(), "20".to_string()),
            ]
        );

        let envelope = json!({"size": 95});
        let mut requested = 1;
        while let NextPage::Fetch(next) = strategy.next(&state, &envelope, 20).unwrap() {
            state = next;
            requested += 1;
        }
        assert_eq!(requested, 5);
        assert_eq!(state.token, PageToken::Number(5));
    }

    #[test]
    fn offset_until_empty() {
        let strategy = OffsetPagination::new("page", "per_page", PageTotal::UntilEmpty);
        let state = strategy.initial(50);
        assert!(matches!(
            strategy.next(&state, &json!([]), 50).unwrap(),
            NextPage::Fetch(_)
        ));
        assert_eq!(
            strategy.next(&state, &json!([]), 0).unwrap(),
            NextPage::EndOfCollection
        );
    }

    #[test]
    fn offset_missing_total_is_a_decode_error() {
        let strategy = OffsetPagination::new("p", "ps", PageTotal::Reported("/paging/total".into()));
        let err = strategy
            .next(&strategy.initial(10), &json!({"paging": {}}), 10)
            .unwrap_err();
        assert!(matches!(err, LakeflowError::Decode { .. }));
    }

    #[test]
    fn cursor_follows_next_link_token() {
        let strategy = CursorPagination::new("/next", "page", "pagelen").with_param("state", "all");
        let state = strategy.initial(50);
        assert!(!strategy.query(&state).iter().any(|(k, _)| k == "page"));

        let envelope = json!({
            "values": [],
            "next": "https://api.bitbucket.org/2.0/repositories/a/b/pullrequests?pagelen=50&page=Zm9v"
        });
        let NextPage::Fetch(next) = strategy.next(&state, &envelope, 1).unwrap() else {
            panic!("expected another page");
        };
        assert_eq!(next.token, PageToken::Cursor(Some("Zm9v".into())));
        assert!(strategy.query(&next).contains(&("page".to_string(), "Zm9v".to_string())));
    }

    #[test]
    fn cursor_without_next_link_ends_collection() {
        let strategy = CursorPagination::new("/next", "page", "pagelen");
        let state = strategy.initial(50);
        assert_eq!(
            strategy.next(&state, &json!({"values": []}), 0).unwrap(),
            NextPage::EndOfCollection
        );
        assert_eq!(
            strategy.next(&state, &json!({"next": ""}), 0).unwrap(),
            NextPage::EndOfCollection
        );
    }

    #[test]
    fn cursor_unparseable_next_link_is_a_hard_error() {
        let strategy = CursorPagination::new("/next", "page", "pagelen");
        let err = strategy
            .next(&strategy.initial(50), &json!({"next": "::not a url::"}), 1)
            .unwrap_err();
        assert!(matches!(err, LakeflowError::Decode { .. }));
    }
}
