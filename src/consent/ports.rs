//! Seams between the dispatcher and the outside world.

use crate::errors::ConsentError;
use crate::models::ConsentCategory;

/// A third-party integration whose behaviour depends on consent.
pub trait InstrumentationPort: Send + Sync {
    /// Vendor name, for logs.
    fn name(&self) -> &str;

    /// Whether this integration reacts to `category` at all.
    fn handles(&self, category: ConsentCategory) -> bool;

    /// Tell the integration it may store data for `category`.
    ///
    /// Returns `IntegrationAbsent` when the integration is not loaded.
    fn grant(&self, category: ConsentCategory) -> Result<(), ConsentError>;

    /// Tell the integration it must stop storing data for `category`.
    fn deny(&self, category: ConsentCategory) -> Result<(), ConsentError>;
}

/// The cookies visible to the current page.
pub trait CookieJar: Send {
    /// Names of the cookies currently set.
    fn list(&self) -> Vec<String>;

    /// Expire `name`. `None` targets the host-only cookie, `Some(domain)` the
    /// cookie set for that domain.
    fn delete(&mut self, name: &str, domain: Option<&str>);

    /// Host the page was served from, if known.
    fn hostname(&self) -> Option<&str> {
        None
    }
}
