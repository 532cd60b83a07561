//! Stitching errors.
use apollo_compiler::Name;
use apollo_compiler::validation::DiagnosticList;
use apollo_compiler::validation::WithErrors;
use displaydoc::Display;
use serde::Serialize;
use thiserror::Error;

pub use crate::configuration::ConfigurationError;
use crate::graphql::Error;
use crate::json_ext::Path;
use crate::json_ext::Value;

/// Errors raised while assembling a stitched schema.
///
/// These are fatal: a schema that fails to build is never served.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum StitchingError {
    #[error("Schema must contain uniquely named types but contains multiple types named \"{name}\"")]
    DuplicateTypeName { name: Name },

    #[error("Invalid schema: {message}")]
    InvalidSchema { message: String },

    #[error("Invalid resolver for \"{type_name}.{key}\": {message}")]
    InvalidResolver {
        type_name: String,
        key: String,
        message: String,
    },

    #[error(
        "Subschema \"{subschema}\" declares merge configuration for type \"{type_name}\" which no source defines"
    )]
    UnknownMergedType { subschema: String, type_name: String },

    #[error("Invalid merge configuration for type \"{type_name}\" in subschema \"{subschema}\": {message}")]
    InvalidMergedTypeConfig {
        subschema: String,
        type_name: String,
        message: String,
    },

    #[error("Invalid selection set \"{selection_set}\" on type \"{type_name}\": {message}")]
    InvalidSelectionSet {
        type_name: String,
        selection_set: String,
        message: String,
    },

    #[error("Transform \"{transform}\" failed: {message}")]
    InvalidTransform { transform: String, message: String },

    #[error("Schema has no query root type")]
    MissingQueryType,

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl StitchingError {
    pub(crate) fn invalid_schema(message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            message: message.into(),
        }
    }
}

impl From<DiagnosticList> for StitchingError {
    fn from(diagnostics: DiagnosticList) -> Self {
        Self::InvalidSchema {
            message: diagnostics.to_string(),
        }
    }
}

impl<T> From<WithErrors<T>> for StitchingError {
    fn from(WithErrors { errors, .. }: WithErrors<T>) -> Self {
        errors.into()
    }
}

/// Error types for delegation.
///
/// These are never fatal: they are converted to a GraphQL [`struct@Error`] located at the
/// field that attempted the delegation.
#[derive(Error, Display, Debug, Clone, Serialize, Eq, PartialEq)]
#[serde(untagged)]
#[ignore_extra_doc_attributes]
#[non_exhaustive]
pub enum DelegationError {
    /// no matching field '{field_name}' on '{type_name}' in subschema '{service}'
    NoMatchingSubschemaField {
        /// The subschema the delegation targeted.
        service: String,

        /// The root type that was searched.
        type_name: String,

        /// The field that could not be found.
        field_name: String,
    },

    /// variable '${name}' is used by the delegated request but was not provided
    MissingVariable {
        /// Name of the variable.
        name: String,
    },

    /// argument '{argument}' of '{field_name}' cannot be sent to subschema '{service}': {reason}
    InvalidArgument {
        /// The subschema the delegation targeted.
        service: String,

        /// The delegated root field.
        field_name: String,

        /// The argument that could not be sent.
        argument: String,

        /// The reason the argument could not be sent.
        reason: String,
    },

    /// request to '{service}' failed: {reason}
    ///
    /// raised by the executor or fetcher of the subschema, not by the GraphQL response itself
    SubrequestFailed {
        /// The subschema that failed.
        service: String,

        /// The reason the request failed.
        reason: String,
    },

    /// service '{service}' response was malformed: {reason}
    MalformedResponse {
        /// The subschema that responded with the malformed response.
        service: String,

        /// The reason the response could not be used.
        reason: String,
    },

    /// service '{service}' does not support subscriptions
    SubscriptionUnsupported {
        /// The subschema that cannot stream.
        service: String,
    },

    /// request transform '{transform}' failed: {reason}
    TransformFailed {
        /// Name of the transform.
        transform: String,

        /// The reason the transform failed.
        reason: String,
    },
}

impl DelegationError {
    /// Convert the delegation error to a GraphQL error.
    pub fn to_graphql_error(&self, path: Option<Path>) -> Error {
        let mut extensions = match serde_json_bytes::to_value(self) {
            Ok(Value::Object(object)) => object,
            _ => Default::default(),
        };
        extensions
            .entry("code")
            .or_insert_with(|| self.extension_code().into());
        match self {
            DelegationError::NoMatchingSubschemaField { service, .. }
            | DelegationError::InvalidArgument { service, .. }
            | DelegationError::SubrequestFailed { service, .. }
            | DelegationError::MalformedResponse { service, .. }
            | DelegationError::SubscriptionUnsupported { service } => {
                extensions
                    .entry("service")
                    .or_insert_with(|| service.clone().into());
            }
            DelegationError::MissingVariable { .. } | DelegationError::TransformFailed { .. } => {}
        }

        Error::builder()
            .message(self.to_string())
            .and_path(path)
            .extensions(extensions)
            .build()
    }

    pub fn extension_code(&self) -> &'static str {
        match self {
            DelegationError::NoMatchingSubschemaField { .. } => "NO_MATCHING_SUBSCHEMA_FIELD",
            DelegationError::MissingVariable { .. } => "MISSING_VARIABLE",
            DelegationError::InvalidArgument { .. } => "INVALID_DELEGATED_ARGUMENT",
            DelegationError::SubrequestFailed { .. } => "SUBREQUEST_FAILED",
            DelegationError::MalformedResponse { .. } => "SUBREQUEST_MALFORMED_RESPONSE",
            DelegationError::SubscriptionUnsupported { .. } => "SUBSCRIPTION_UNSUPPORTED",
            DelegationError::TransformFailed { .. } => "TRANSFORM_FAILED",
        }
    }
}

impl From<DelegationError> for Error {
    fn from(error: DelegationError) -> Self {
        error.to_graphql_error(None)
    }
}
