//! Interactive query UI served to browsers on non-production instances

use axum::http::{HeaderMap, header};

/// Whether a request should get the query UI instead of being forwarded.
///
/// Anything that does not declare a JSON body is treated as a browser.
#[must_use]
pub fn wants_playground(production: bool, headers: &HeaderMap) -> bool {
    if production {
        return false;
    }
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"));
    !is_json
}

/// Render the query UI pointed at `endpoint`
#[must_use]
pub fn render(endpoint: &str) -> String {
    let endpoint = serde_json::to_string(endpoint)
        .unwrap_or_else(|_| "\"/\"".to_string())
        .replace('<', "\\u003c");
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <title>GraphiQL</title>
    <link rel="stylesheet" href="https://unpkg.com/graphiql@3/graphiql.min.css" />
  </head>
  <body style="margin: 0;">
    <div id="graphiql" style="height: 100vh;"></div>
    <script crossorigin src="https://unpkg.com/react@18/umd/react.production.min.js"></script>
    <script crossorigin src="https://unpkg.com/react-dom@18/umd/react-dom.production.min.js"></script>
    <script crossorigin src="https://unpkg.com/graphiql@3/graphiql.min.js"></script>
    <script>
      const fetcher = GraphiQL.createFetcher({{ url: {endpoint} }});
      ReactDOM.createRoot(document.getElementById("graphiql")).render(
        React.createElement(GraphiQL, {{ fetcher }})
      );
    </script>
  </body>
</html>
"#
    )
}
