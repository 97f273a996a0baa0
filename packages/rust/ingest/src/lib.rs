//! Layered collection pipeline for Lakeflow connectors.
//!
//! A connector task runs three phases per resource, each complete before the
//! next starts:
//! 1. [`ApiCollector`] fetches paginated API responses into a raw table
//! 2. [`ApiExtractor`] turns raw payloads into structured tool records
//! 3. [`DataConverter`] maps tool records onto canonical domain entities
//!
//! Pagination protocols implement [`PaginationStrategy`]; dependent
//! collections are driven by a [`CursorIterator`] over stored records.

pub mod client;
pub mod collector;
pub mod context;
pub mod converter;
pub mod extractor;
pub mod iterator;
pub mod pagination;
pub mod plugin;

pub use client::{ApiClient, ApiResponse, HttpConfig, classify_status};
pub use collector::{ApiCollector, CollectSummary, RawDataArgs, render_template};
pub use context::{DEFAULT_PAGE_SIZE, TaskContext};
pub use converter::{Convert, ConvertSummary, Converted, DataConverter};
pub use extractor::{ApiExtractor, ExtractSummary, Extracted, ToolRecord, decode_raw};
pub use iterator::{CursorIterator, InputSource};
pub use pagination::{
    CursorPagination, NextPage, OffsetPagination, PageToken, PageTotal, PaginationState,
    PaginationStrategy,
};
pub use plugin::{Plugin, PluginRegistry, SubtaskEntryPoint, SubtaskMeta, resolve_subtasks};
