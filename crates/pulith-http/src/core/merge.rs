use serde_json::Value;

use crate::data::{HeaderPatch, Hooks, Options, RetryOptions, SearchParams};

/// Deep-merge option layers, later layers taking precedence.
///
/// `None` layers are skipped. Earlier layers are consumed, never mutated in place.
///
/// # Examples
///
/// ```
/// use pulith_http::{Options, merge};
///
/// let merged = merge([
///     Some(Options::default().header("x-a", "1").retry(1)),
///     None,
///     Some(Options::default().remove_header("x-a").retry(4)),
/// ]);
/// assert_eq!(merged.retry.and_then(|retry| retry.limit), Some(4));
/// assert_eq!(merged.headers.get("x-a"), Some(&None));
/// ```
pub fn merge<I>(layers: I) -> Options
where
    I: IntoIterator,
    I::Item: Into<Option<Options>>,
{
    layers
        .into_iter()
        .filter_map(Into::into)
        .fold(Options::default(), merge_layer)
}

fn merge_layer(base: Options, incoming: Options) -> Options {
    let mut invalid_headers = base.invalid_headers;
    invalid_headers.extend(incoming.invalid_headers);

    Options {
        method: incoming.method.or(base.method),
        headers: merge_headers(base.headers, incoming.headers),
        body: incoming.body.or(base.body),
        json: match (base.json, incoming.json) {
            (Some(base), Some(incoming)) => Some(merge_values(base, incoming)),
            (base, incoming) => incoming.or(base),
        },
        search_params: merge_search_params(base.search_params, incoming.search_params),
        prefix_url: incoming.prefix_url.or(base.prefix_url),
        retry: match (base.retry, incoming.retry) {
            (Some(base), Some(incoming)) => Some(merge_retry(base, incoming)),
            (base, incoming) => incoming.or(base),
        },
        timeout: incoming.timeout.or(base.timeout),
        hooks: merge_hooks(base.hooks, incoming.hooks),
        throw_on_error: incoming.throw_on_error.or(base.throw_on_error),
        on_download_progress: incoming.on_download_progress.or(base.on_download_progress),
        on_upload_progress: incoming.on_upload_progress.or(base.on_upload_progress),
        transport: incoming.transport.or(base.transport),
        parse_json: incoming.parse_json.or(base.parse_json),
        stringify_json: incoming.stringify_json.or(base.stringify_json),
        signal: incoming.signal.or(base.signal),
        extra: match merge_values(Value::Object(base.extra), Value::Object(incoming.extra)) {
            Value::Object(extra) => extra,
            _ => serde_json::Map::new(),
        },
        invalid_headers,
    }
}

/// Structural merge of JSON values.
///
/// Arrays concatenate, objects merge key by key (recursing into shared keys),
/// anything else is replaced by `incoming`.
pub fn merge_values(base: Value, incoming: Value) -> Value {
    match (base, incoming) {
        (Value::Array(mut base), Value::Array(incoming)) => {
            base.extend(incoming);
            Value::Array(base)
        }
        (Value::Object(mut base), Value::Object(incoming)) => {
            for (key, value) in incoming {
                let merged = match base.remove(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, incoming) => incoming,
    }
}

/// Apply `incoming` header changes on top of `base`.
///
/// Names compare case-insensitively. A delete marker in `incoming` replaces any
/// value from `base` and stays in the patch so that it also removes the header
/// from a request target.
pub fn merge_headers(mut base: HeaderPatch, incoming: HeaderPatch) -> HeaderPatch {
    let mut current = None;
    for (name, value) in incoming {
        match name {
            Some(name) => {
                base.insert(name.clone(), value);
                current = Some(name);
            }
            None => {
                if let Some(name) = &current {
                    base.append(name.clone(), value);
                }
            }
        }
    }
    base
}

/// Concatenate hooks per category. An explicitly empty category in `incoming`
/// discards the hooks of `base`.
pub fn merge_hooks(base: Hooks, incoming: Hooks) -> Hooks {
    Hooks {
        before_request: concat_hooks(base.before_request, incoming.before_request),
        before_retry: concat_hooks(base.before_retry, incoming.before_retry),
        after_response: concat_hooks(base.after_response, incoming.after_response),
        before_error: concat_hooks(base.before_error, incoming.before_error),
    }
}

fn concat_hooks<T>(base: Option<Vec<T>>, incoming: Option<Vec<T>>) -> Option<Vec<T>> {
    match incoming {
        None => base,
        Some(incoming) if incoming.is_empty() => Some(incoming),
        Some(incoming) => {
            let mut all = base.unwrap_or_default();
            all.extend(incoming);
            Some(all)
        }
    }
}

/// Field-wise retry merge: lists concatenate, scalars are replaced.
pub fn merge_retry(base: RetryOptions, incoming: RetryOptions) -> RetryOptions {
    RetryOptions {
        limit: incoming.limit.or(base.limit),
        methods: concat_lists(base.methods, incoming.methods),
        status_codes: concat_lists(base.status_codes, incoming.status_codes),
        after_status_codes: concat_lists(base.after_status_codes, incoming.after_status_codes),
        max_retry_after: incoming.max_retry_after.or(base.max_retry_after),
        backoff_limit: incoming.backoff_limit.or(base.backoff_limit),
        delay: incoming.delay.or(base.delay),
    }
}

fn concat_lists<T>(base: Option<Vec<T>>, incoming: Option<Vec<T>>) -> Option<Vec<T>> {
    match (base, incoming) {
        (Some(mut base), Some(incoming)) => {
            base.extend(incoming);
            Some(base)
        }
        (base, incoming) => incoming.or(base),
    }
}

/// Pair lists merge by key: keys present in `incoming` replace those of `base`.
/// Raw query text is replaced wholesale.
pub fn merge_search_params(
    base: Option<SearchParams>,
    incoming: Option<SearchParams>,
) -> Option<SearchParams> {
    match (base, incoming) {
        (Some(SearchParams::Pairs(mut base)), Some(SearchParams::Pairs(incoming))) => {
            base.retain(|(key, _)| !incoming.iter().any(|(other, _)| other == key));
            base.extend(incoming);
            Some(SearchParams::Pairs(base))
        }
        (base, incoming) => incoming.or(base),
    }
}
