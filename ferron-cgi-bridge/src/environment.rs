use hashlink::LinkedHashMap;

use crate::config::ValidatedConfig;
use crate::request::InboundRequest;

/// The server software name reported to the backend
pub const SERVER_SOFTWARE: &str = "Ferron";

/// Variables derived from optional request data, which are removed from the backend environment when absent
const OPTIONAL_VARIABLES: [&str; 7] = [
  "SERVER_PROTOCOL",
  "HTTP_ACCEPT",
  "HTTP_ACCEPT_ENCODING",
  "HTTP_CONTENT_ENCODING",
  "CONTENT_LENGTH",
  "CONTENT_TYPE",
  "HTTP_USER_AGENT",
];

/// The CGI environment variables passed to the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEnvironment {
  variables: LinkedHashMap<&'static str, String>,
}

impl BackendEnvironment {
  /// Builds the environment for a request
  pub fn build(request: &InboundRequest, config: &ValidatedConfig) -> Self {
    let mut variables = LinkedHashMap::new();

    variables.insert("GATEWAY_INTERFACE", "CGI/1.1".to_string());
    variables.insert("SERVER_SOFTWARE", SERVER_SOFTWARE.to_string());
    variables.insert("REQUEST_METHOD", request.method.as_str().to_string());
    variables.insert("REQUEST_URI", request.target.clone());
    variables.insert("PATH_INFO", request.path().to_string());
    variables.insert("QUERY_STRING", request.query().to_string());

    let headers = &request.headers;
    let optional_values = [
      request.protocol.as_ref(),
      headers.accept.as_ref(),
      headers.accept_encoding.as_ref(),
      headers.content_encoding.as_ref(),
      headers.content_length.as_ref(),
      headers.content_type.as_ref(),
      headers.user_agent.as_ref(),
    ];
    for (name, value) in OPTIONAL_VARIABLES.into_iter().zip(optional_values) {
      if let Some(value) = value {
        variables.insert(name, value.clone());
      }
    }

    variables.insert(
      "SCRIPT_FILENAME",
      config.backend().to_string_lossy().to_string(),
    );
    let project_root = config.project_root().to_string_lossy().to_string();
    variables.insert("DOCUMENT_ROOT", project_root.clone());
    variables.insert("GIT_PROJECT_ROOT", project_root);

    Self { variables }
  }

  /// Obtains the value of a variable
  #[cfg(test)]
  pub fn get(&self, name: &str) -> Option<&str> {
    self.variables.get(name).map(|value| value.as_str())
  }

  /// Iterates over the variables that are set, in insertion order
  pub fn variables(&self) -> impl Iterator<Item = (&'static str, &str)> + '_ {
    self
      .variables
      .iter()
      .map(|(name, value)| (*name, value.as_str()))
  }

  /// Iterates over the variables that must be absent from the backend environment
  pub fn unset_variables(&self) -> impl Iterator<Item = &'static str> + '_ {
    OPTIONAL_VARIABLES
      .into_iter()
      .filter(|name| !self.variables.contains_key(name))
  }
}
