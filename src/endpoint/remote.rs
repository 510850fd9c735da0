//! Remote object facade
//!
//! Domain facades (stage, detector, beam...) wrap a [`RemoteObject`] and turn
//! their methods into calls on it.

use super::{Endpoint, EndpointResult};
use crate::protocol::CallRequest;
use crate::serialization::{ObjectHandle, TypedValue};

#[derive(Clone)]
pub struct RemoteObject {
    endpoint: Endpoint,
    object_id: String,
}

impl RemoteObject {
    pub fn new(endpoint: Endpoint, object_id: impl Into<String>) -> Self {
        Self {
            endpoint,
            object_id: object_id.into(),
        }
    }

    /// Address the object a handle refers to
    pub fn from_handle(endpoint: Endpoint, handle: &ObjectHandle) -> Self {
        Self::new(endpoint, handle.id())
    }

    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn request(&self, method_name: impl Into<String>) -> CallRequest {
        CallRequest::new(self.object_id.clone(), method_name)
    }

    pub async fn call(
        &self,
        method_name: impl Into<String>,
        parameters: impl IntoIterator<Item = TypedValue>,
    ) -> EndpointResult<TypedValue> {
        let request = self.request(method_name).with_params(parameters);
        self.endpoint.perform_call(request).await
    }
}
