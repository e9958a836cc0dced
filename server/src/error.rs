use std::fmt;

use anyhow::Error as AnyError;
use dossier_core::{
    access::{AccessLevel, AccessListError, AccessTarget, UnmetRequirements},
    db::errors::is_unique_violation,
    ids::{DocumentId, TemplateId},
};
use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    PermissionDenied,
    NotFound,
    DuplicateGrant,
    Internal,
    WorkflowItemFailure,
}

#[derive(Debug, Clone, Copy)]
struct ErrorDescriptor {
    kind: ErrorKind,
    name: &'static str,
    error_type: &'static str,
    default_message: &'static str,
}

const VALIDATION_DESCRIPTOR: ErrorDescriptor = ErrorDescriptor {
    kind: ErrorKind::Validation,
    name: "VALIDATION_ERROR",
    error_type: "INVALID_INPUT",
    default_message: "Invalid input.",
};

const PERMISSION_DENIED_DESCRIPTOR: ErrorDescriptor = ErrorDescriptor {
    kind: ErrorKind::PermissionDenied,
    name: "PERMISSION_DENIED",
    error_type: "NO_PERMISSION",
    default_message: "You do not have permission to perform this action.",
};

const NOT_FOUND_DESCRIPTOR: ErrorDescriptor = ErrorDescriptor {
    kind: ErrorKind::NotFound,
    name: "NOT_FOUND",
    error_type: "RESOURCE_NOT_FOUND",
    default_message: "Resource not found.",
};

const DUPLICATE_GRANT_DESCRIPTOR: ErrorDescriptor = ErrorDescriptor {
    kind: ErrorKind::DuplicateGrant,
    name: "DUPLICATE_GRANT",
    error_type: "RESOURCE_ALREADY_EXISTS",
    default_message: "A grant with the same key already exists.",
};

const INTERNAL_DESCRIPTOR: ErrorDescriptor = ErrorDescriptor {
    kind: ErrorKind::Internal,
    name: "INTERNAL_ERROR",
    error_type: "INTERNAL_SERVER_ERROR",
    default_message: "An internal error occurred.",
};

const WORKFLOW_ITEM_FAILURE_DESCRIPTOR: ErrorDescriptor = ErrorDescriptor {
    kind: ErrorKind::WorkflowItemFailure,
    name: "WORKFLOW_ITEM_FAILURE",
    error_type: "WORKFLOW_ITEM_FAILURE",
    default_message: "A workflow item could not be processed.",
};

#[derive(Debug)]
pub struct AppError {
    descriptor: &'static ErrorDescriptor,
    name: String,
    message: String,
    data: Option<JsonValue>,
    source: Option<AnyError>,
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::from_descriptor(&VALIDATION_DESCRIPTOR, Some(message.into()))
    }

    pub fn access_list(err: AccessListError) -> Self {
        let name = match &err {
            AccessListError::DuplicateJobGrant { .. } | AccessListError::DuplicateUserGrant { .. } => {
                "DUPLICATE_GRANT_KEY"
            }
            AccessListError::UnspecifiedLevel | AccessListError::LevelOutOfRange(_) => {
                "INVALID_ACCESS_LEVEL"
            }
            AccessListError::ModeOutOfRange(_) => "INVALID_ACCESS_MODE",
        };
        Self::validation(err.to_string()).with_name(name)
    }

    pub fn unmet_requirements(template_id: TemplateId, err: UnmetRequirements) -> Self {
        let unmet: Vec<String> = err.0.iter().map(ToString::to_string).collect();
        Self::validation(err.to_string())
            .with_name("TEMPLATE_REQUIREMENTS_NOT_MET")
            .with_data(json!({ "templateId": template_id, "unmet": unmet }))
    }

    pub fn permission_denied(target: AccessTarget, required: AccessLevel) -> Self {
        let message = format!("You need {required} access to {target}.");
        Self::from_descriptor(&PERMISSION_DENIED_DESCRIPTOR, Some(message)).with_data(json!({
            "target": target,
            "required": required,
        }))
    }

    pub fn document_not_found(document_id: DocumentId) -> Self {
        Self::from_descriptor(
            &NOT_FOUND_DESCRIPTOR,
            Some(format!("Document {document_id} not found.")),
        )
        .with_name("DOCUMENT_NOT_FOUND")
        .with_data(json!({ "documentId": document_id }))
    }

    pub fn template_not_found(template_id: TemplateId) -> Self {
        Self::from_descriptor(
            &NOT_FOUND_DESCRIPTOR,
            Some(format!("Template {template_id} not found.")),
        )
        .with_name("TEMPLATE_NOT_FOUND")
        .with_data(json!({ "templateId": template_id }))
    }

    pub fn duplicate_grant(target: AccessTarget) -> Self {
        Self::from_descriptor(
            &DUPLICATE_GRANT_DESCRIPTOR,
            Some(format!("A grant with the same key already exists on {target}.")),
        )
        .with_data(json!({ "target": target }))
    }

    /// Opaque to callers; the cause is logged here and kept only as `source`.
    pub fn internal(error: AnyError) -> Self {
        error!(?error, "internal error");
        Self::from_descriptor(&INTERNAL_DESCRIPTOR, None).with_source(error)
    }

    /// Failed transactional write on `target`: unique violations become
    /// `DUPLICATE_GRANT`, anything else an internal error.
    pub fn storage(target: AccessTarget, error: AnyError) -> Self {
        if is_unique_violation(&error) {
            Self::duplicate_grant(target).with_source(error)
        } else {
            Self::internal(error)
        }
    }

    pub fn workflow_item(document_id: DocumentId, task: &str, error: AnyError) -> Self {
        Self::from_descriptor(
            &WORKFLOW_ITEM_FAILURE_DESCRIPTOR,
            Some(format!("{task} for document {document_id} failed.")),
        )
        .with_data(json!({ "documentId": document_id, "task": task }))
        .with_source(error)
    }

    pub fn kind(&self) -> ErrorKind {
        self.descriptor.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn source_error(&self) -> Option<&AnyError> {
        self.source.as_ref()
    }

    pub fn into_payload(self) -> ErrorPayload {
        let AppError {
            descriptor,
            name,
            message,
            data,
            source: _,
        } = self;

        ErrorPayload {
            kind: descriptor.kind,
            error_type: descriptor.error_type.to_owned(),
            name,
            message,
            data,
        }
    }

    fn from_descriptor(descriptor: &'static ErrorDescriptor, message: Option<String>) -> Self {
        Self {
            descriptor,
            name: descriptor.name.to_owned(),
            message: message.unwrap_or_else(|| descriptor.default_message.to_owned()),
            data: None,
            source: None,
        }
    }

    fn with_source(mut self, error: AnyError) -> Self {
        self.source = Some(error);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_data(mut self, data: JsonValue) -> Self {
        self.data = Some(data);
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|err| err.as_ref() as _)
    }
}

impl From<AccessListError> for AppError {
    fn from(err: AccessListError) -> Self {
        Self::access_list(err)
    }
}

impl From<AnyError> for AppError {
    fn from(err: AnyError) -> Self {
        Self::internal(err)
    }
}

/// What callers see of an [`AppError`]. Internal causes never appear here.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    #[serde(rename = "type")]
    pub error_type: String,
    pub name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

pub type AppResult<T> = Result<T, AppError>;
