/// Shared constants for the event discovery pipeline.

/// Toronto open data festivals & events feed (JSON document with a `value` array).
pub const TORONTO_EVENTS_ENDPOINT: &str = "https://ckan0.cf.opendata.inter.prod-toronto.ca/dataset/9201059e-43ed-4369-885e-0b867652feac/resource/8900fdb2-7f6c-4f50-8581-b463311ff05d/download/file.json";

/// Base URL for resolving event image `bin_id` references.
pub const TORONTO_IMAGE_BASE: &str =
    "https://secure.toronto.ca/c3api_data/v2/DataAccess.svc/festivals_events/images";

/// Fallback reference point for distance scoring when the caller supplies no
/// location (downtown Toronto).
pub const TORONTO_CENTER_LAT: f64 = 43.6532;
pub const TORONTO_CENTER_LNG: f64 = -79.3832;

/// Name of the single tool declared to the language model.
pub const FILTER_TOOL_NAME: &str = "filter_events";

/// How many conversational turns of context the search endpoint will forward
/// to the language model.
pub const MAX_CONTEXT_MESSAGES: usize = 5;
