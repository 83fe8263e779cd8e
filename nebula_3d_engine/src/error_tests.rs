use super::*;

// ============================================================================
// Display tests
// ============================================================================

#[test]
fn test_backend_error_display() {
    let err = Error::BackendError("queue submit failed".to_string());
    assert_eq!(format!("{}", err), "Backend error: queue submit failed");
}

#[test]
fn test_out_of_memory_display() {
    let err = Error::OutOfMemory;
    assert_eq!(format!("{}", err), "Out of GPU memory");
}

#[test]
fn test_invalid_resource_display() {
    let err = Error::InvalidResource("texture handle".to_string());
    assert_eq!(format!("{}", err), "Invalid resource: texture handle");
}

#[test]
fn test_invalid_precondition_display() {
    let err = Error::InvalidPrecondition("binding 9 out of range".to_string());
    assert_eq!(
        format!("{}", err),
        "Invalid precondition: binding 9 out of range"
    );
}

#[test]
fn test_initialization_failed_display() {
    let err = Error::InitializationFailed("no suitable GPU".to_string());
    assert_eq!(format!("{}", err), "Initialization failed: no suitable GPU");
}

#[test]
fn test_swap_chain_out_of_date_display() {
    let err = Error::SwapChainOutOfDate;
    assert_eq!(format!("{}", err), "Swap chain out of date");
}

// ============================================================================
// Trait tests
// ============================================================================

#[test]
fn test_error_is_clone() {
    let err = Error::InvalidResource("buffer".to_string());
    let cloned = err.clone();
    assert_eq!(format!("{}", err), format!("{}", cloned));
}

#[test]
fn test_error_implements_std_error() {
    fn assert_std_error<E: std::error::Error>() {}
    assert_std_error::<Error>();
}

#[test]
fn test_result_alias() {
    fn returns_result() -> Result<u32> {
        Ok(7)
    }
    assert_eq!(returns_result().unwrap(), 7);

    fn returns_error() -> Result<u32> {
        Err(Error::OutOfMemory)
    }
    assert!(returns_error().is_err());
}
