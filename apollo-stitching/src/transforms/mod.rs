//! Transforms rewrite a subschema's schema, the requests sent to it and the results it returns.
//!
//! A transform sees the schema once, when the subschema is built, through
//! [`Transform::transform_schema`]. Requests flow through a list of transforms in order and
//! results flow back through the same list in reverse, so that each transform undoes its own
//! request rewrite before the rewrites of the transforms preceding it are undone.

use std::sync::Arc;

use apollo_compiler::Schema;

use crate::context::Context;
use crate::error::DelegationError;
use crate::error::StitchingError;
use crate::execution::ResolverMap;
use crate::graphql;

mod abstract_types;
mod extend;
mod filter;
mod rename;
mod request;
mod selection_sets;
mod wrap;

pub use abstract_types::AddTypenameToAbstract;
pub use abstract_types::ExpandAbstractTypes;
pub use extend::ExtendSchema;
pub use filter::FilterObjectFields;
pub use filter::FilterRootFields;
pub use filter::FilterToSchema;
pub use filter::FilterTypes;
pub use rename::RenameObjectFields;
pub use rename::RenameRootFields;
pub use rename::RenameTypes;
pub use request::DelegationRequest;
pub(crate) use request::collect_variables;
pub(crate) use request::field_selection;
pub(crate) use request::rewrite_fields;
pub use selection_sets::AddMergedTypeSelectionSets;
pub use wrap::HoistField;
pub use wrap::WrapFields;

pub trait Transform: Send + Sync {
    fn name(&self) -> &'static str;

    /// Rewrites the schema. Called once, before the transform handles any request.
    fn transform_schema(&mut self, schema: Schema) -> Result<Schema, StitchingError> {
        Ok(schema)
    }

    fn transform_request(
        &self,
        request: DelegationRequest,
        _context: &Context,
    ) -> Result<DelegationRequest, DelegationError> {
        Ok(request)
    }

    fn transform_result(&self, response: graphql::Response, _context: &Context) -> graphql::Response {
        response
    }

    /// Resolvers for fields this transform adds to the schema.
    fn resolvers(&self) -> Option<ResolverMap> {
        None
    }
}

/// Applies request transforms in order.
pub(crate) fn transform_request(
    transforms: &[Arc<dyn Transform>],
    request: DelegationRequest,
    context: &Context,
) -> Result<DelegationRequest, DelegationError> {
    transforms
        .iter()
        .try_fold(request, |request, transform| {
            transform.transform_request(request, context)
        })
}

/// Applies result transforms in reverse order.
pub(crate) fn transform_result(
    transforms: &[Arc<dyn Transform>],
    response: graphql::Response,
    context: &Context,
) -> graphql::Response {
    transforms
        .iter()
        .rev()
        .fold(response, |response, transform| {
            transform.transform_result(response, context)
        })
}

#[cfg(test)]
mod tests {
    use apollo_compiler::ast::OperationType;
    use parking_lot::Mutex;
    use serde_json_bytes::json;

    use super::*;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Transform for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn transform_request(
            &self,
            request: DelegationRequest,
            _context: &Context,
        ) -> Result<DelegationRequest, DelegationError> {
            self.log.lock().push(format!("request {}", self.name));
            Ok(request)
        }

        fn transform_result(
            &self,
            response: graphql::Response,
            _context: &Context,
        ) -> graphql::Response {
            self.log.lock().push(format!("result {}", self.name));
            response
        }
    }

    #[test]
    fn test_results_are_transformed_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let transforms: Vec<Arc<dyn Transform>> = vec![
            Arc::new(Recorder {
                name: "first",
                log: log.clone(),
            }),
            Arc::new(Recorder {
                name: "second",
                log: log.clone(),
            }),
        ];
        let context = Context::new();
        let request = DelegationRequest::new(OperationType::Query, Vec::new());
        transform_request(&transforms, request, &context).unwrap();
        transform_result(
            &transforms,
            graphql::Response::builder().data(json!({})).build(),
            &context,
        );
        assert_eq!(
            *log.lock(),
            vec![
                "request first",
                "request second",
                "result second",
                "result first"
            ]
        );
    }
}
