use std::path::{Component, Path};

use crate::TransferError;

/// Validates a file name announced in a start message before it is used to
/// name an artifact inside the output directory.
///
/// Accepts a single plain path component. Rejects:
/// - Empty names and names containing NUL
/// - Absolute paths, root or prefix components (`/`, `C:`, `\\server`)
/// - Parent (`..`) and current (`.`) directory references
/// - Nested paths (`dir/file`): one transfer carries one file
pub fn validate_file_name(file_name: &str) -> Result<(), TransferError> {
    if file_name.is_empty() {
        return Err(TransferError::InvalidPath("empty file name".into()));
    }
    if file_name.contains('\0') {
        return Err(TransferError::InvalidPath(format!(
            "NUL byte in file name: {file_name:?}"
        )));
    }

    let mut components = Path::new(file_name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        (Some(Component::ParentDir), _) | (Some(Component::Normal(_)), Some(Component::ParentDir)) => {
            Err(TransferError::InvalidPath(format!(
                "parent directory traversal not allowed: {file_name}"
            )))
        }
        (Some(Component::RootDir | Component::Prefix(_)), _) => Err(TransferError::InvalidPath(
            format!("absolute path not allowed: {file_name}"),
        )),
        _ => Err(TransferError::InvalidPath(format!(
            "expected a plain file name: {file_name}"
        ))),
    }
}
