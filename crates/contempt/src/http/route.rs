//! REST routes and their rate-limit bucket keys.

use std::fmt;

use reqwest::Method;

/// Path segments whose following id is a major parameter: requests that
/// differ in it are limited independently.
const MAJOR_PARAMETERS: [&str; 3] = ["channels", "guilds", "webhooks"];

/// A request target: method plus path relative to the API root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    method: Method,
    path: String,
    bucket: String,
}

impl Route {
    /// Route for `method` on `path`, e.g. `/channels/1/messages`.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        let bucket = bucket_key(&method, &path);
        Self {
            method,
            path,
            bucket,
        }
    }

    /// `GET` route.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// `POST` route.
    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Request method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path relative to the API root.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Rate-limit bucket this route counts against.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

fn is_id(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

/// `METHOD /path`, with ids that are not major parameters replaced by `:id`
/// and any query string dropped.
fn bucket_key(method: &Method, path: &str) -> String {
    let path = path.split('?').next().unwrap_or_default();

    let mut key = String::with_capacity(path.len() + 8);
    key.push_str(method.as_str());
    key.push(' ');

    let mut previous = "";
    let mut empty = true;
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        key.push('/');
        if is_id(segment) && !MAJOR_PARAMETERS.contains(&previous) {
            key.push_str(":id");
        } else {
            key.push_str(segment);
        }
        previous = segment;
        empty = false;
    }
    if empty {
        key.push('/');
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Method::GET, "/channels/1/messages", "GET /channels/1/messages" ; "major channel kept")]
    #[test_case(Method::GET, "/channels/1/messages?limit=50&before=9", "GET /channels/1/messages" ; "query dropped")]
    #[test_case(Method::DELETE, "/channels/1/messages/555", "DELETE /channels/1/messages/:id" ; "minor id replaced")]
    #[test_case(Method::GET, "/guilds/7/members/8", "GET /guilds/7/members/:id" ; "major guild kept")]
    #[test_case(Method::GET, "/users/@me", "GET /users/@me" ; "no ids")]
    #[test_case(Method::GET, "/users/42/profile", "GET /users/:id/profile" ; "user id is minor")]
    #[test_case(Method::GET, "", "GET /" ; "root")]
    fn test_bucket_key(method: Method, path: &str, expected: &str) {
        assert_eq!(Route::new(method, path).bucket(), expected);
    }

    #[test]
    fn test_same_route_different_channels_are_separate_buckets() {
        let a = Route::get("/channels/1/messages");
        let b = Route::get("/channels/2/messages");
        assert_ne!(a.bucket(), b.bucket());
    }

    #[test]
    fn test_method_separates_buckets() {
        let get = Route::get("/channels/1/messages");
        let post = Route::post("/channels/1/messages");
        assert_ne!(get.bucket(), post.bucket());
        assert_eq!(post.to_string(), "POST /channels/1/messages");
    }
}
