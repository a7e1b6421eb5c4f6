use std::sync::Arc;

use axum::http::Method;

/// A per-request exemption test for one gate stage. Pure in (method, path).
pub type Skipper = Arc<dyn Fn(&Method, &str) -> bool + Send + Sync>;

/// Skip when the path starts with any of the prefixes.
pub fn allow_path_prefix<I, S>(prefixes: I) -> Skipper
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let prefixes: Vec<String> = prefixes.into_iter().map(Into::into).collect();
    Arc::new(move |_method: &Method, path: &str| {
        prefixes.iter().any(|p| path.starts_with(p.as_str()))
    })
}

/// Skip unless the path starts with one of the prefixes.
pub fn allow_path_prefix_no<I, S>(prefixes: I) -> Skipper
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let prefixes: Vec<String> = prefixes.into_iter().map(Into::into).collect();
    Arc::new(move |_method: &Method, path: &str| {
        !prefixes.iter().any(|p| path.starts_with(p.as_str()))
    })
}

/// Skip when `METHOD/path` starts with any prefix built by [`join_router`].
pub fn allow_method_and_path_prefix<I, S>(prefixes: I) -> Skipper
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let prefixes: Vec<String> = prefixes.into_iter().map(Into::into).collect();
    Arc::new(move |method: &Method, path: &str| {
        let joined = join_router(method.as_str(), path);
        prefixes.iter().any(|p| joined.starts_with(p.as_str()))
    })
}

/// join_router
///
/// Normalises a method/path pair into the `GET/api/v1/...` form the method-aware
/// skipper matches against.
pub fn join_router(method: &str, path: &str) -> String {
    if path.starts_with('/') {
        format!("{}{}", method.to_uppercase(), path)
    } else {
        format!("{}/{}", method.to_uppercase(), path)
    }
}

/// True when any skipper exempts the request.
pub fn any_skips(skippers: &[Skipper], method: &Method, path: &str) -> bool {
    skippers.iter().any(|skip| skip(method, path))
}
