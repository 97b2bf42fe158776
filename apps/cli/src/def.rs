/// Name of this crate.
pub const NAME: &str = "avrbridge";
