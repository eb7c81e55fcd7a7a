//! Configuration access port trait.
//!
//! Values are looked up by INI-style `section` and `key`. Blank values read
//! as absent; callers parse and range-check what they need.

pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;

    /// Keys present in `section`, in no particular order.
    fn keys(&self, section: &str) -> Vec<String>;
}
