//! Document id generation

use uuid::Uuid;

/// Source of ids for documents inserted without one
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Random v4 UUIDs in hyphenated form
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

impl<F> IdGenerator for F
where
    F: Fn() -> String + Send + Sync,
{
    fn generate(&self) -> String {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_ids_are_unique() {
        let gen = UuidGenerator;
        let a = gen.generate();
        let b = gen.generate();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn test_closure_generator() {
        let gen = || "fixed".to_string();
        assert_eq!(IdGenerator::generate(&gen), "fixed");
    }
}
