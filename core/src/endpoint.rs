//! Endpoint naming convention.
//!
//! Each consumer receives messages on its own endpoint (a consumer group on the
//! broker). The endpoint name is derived from the service name and the consumer's
//! type name, so it is identical across restarts and redelivery after a crash lands on
//! the same queue.
//!
//! # Convention
//!
//! `{kebab(service name)}-{kebab(consumer type name)}`, lowercase and hyphenated.
//! Names are never pluralized, so adding or renaming unrelated types can never shift
//! an existing endpoint.
//!
//! ```
//! use service_common_core::endpoint::EndpointNameFormatter;
//!
//! let formatter = EndpointNameFormatter::new("matchmaking");
//! assert_eq!(
//!     formatter.format("MatchRequestedConsumer"),
//!     "matchmaking-match-requested-consumer"
//! );
//! ```
//!
//! Messages that exhaust their retries are moved to `{endpoint}_error`.

/// Suffix appended to an endpoint name to form its error queue.
pub const ERROR_QUEUE_SUFFIX: &str = "_error";

/// The type name of `T` without module path or generic arguments.
///
/// `my_service::consumers::MatchRequestedConsumer<Foo>` becomes `MatchRequestedConsumer`.
///
/// Built on [`std::any::type_name`], whose output is not guaranteed to stay the same
/// across compiler releases. Names that must survive a toolchain upgrade should be
/// spelled out through `Consumer::name`.
#[must_use]
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Convert a type or service name to lowercase kebab case.
///
/// Word boundaries are lowercase→uppercase, digit→uppercase, the last capital of an
/// acronym followed by lowercase (`HTTPRequest` → `http-request`), and any character
/// other than an ASCII letter or digit. The result only contains `[a-z0-9-]`, which
/// every broker accepts in queue and topic names.
#[must_use]
pub fn kebab_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 8);

    for (index, &c) in chars.iter().enumerate() {
        if !c.is_ascii_alphanumeric() {
            push_separator(&mut out);
            continue;
        }

        if c.is_ascii_uppercase() {
            let previous = index.checked_sub(1).and_then(|i| chars.get(i));
            let next = chars.get(index + 1);
            let boundary = match previous {
                Some(p) if p.is_ascii_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_ascii_uppercase() => next.is_some_and(char::is_ascii_lowercase),
                _ => false,
            };
            if boundary {
                push_separator(&mut out);
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }

    while out.ends_with('-') {
        out.pop();
    }
    out
}

fn push_separator(out: &mut String) {
    if !out.is_empty() && !out.ends_with('-') {
        out.push('-');
    }
}

/// Derives endpoint names for consumers of one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointNameFormatter {
    prefix: Option<String>,
}

impl EndpointNameFormatter {
    /// A formatter prefixing every endpoint with the kebab-cased service name.
    ///
    /// An empty service name yields unprefixed endpoint names.
    #[must_use]
    pub fn new(service_name: &str) -> Self {
        let prefix = kebab_case(service_name);
        Self {
            prefix: (!prefix.is_empty()).then_some(prefix),
        }
    }

    /// A formatter that uses the consumer name alone.
    #[must_use]
    pub const fn unprefixed() -> Self {
        Self { prefix: None }
    }

    /// Endpoint name for a consumer type name.
    #[must_use]
    pub fn format(&self, consumer_type_name: &str) -> String {
        let name = kebab_case(consumer_type_name);
        match &self.prefix {
            Some(prefix) if !name.is_empty() => format!("{prefix}-{name}"),
            Some(prefix) => prefix.clone(),
            None => name,
        }
    }

    /// Endpoint name for consumer type `C`.
    #[must_use]
    pub fn consumer<C: ?Sized>(&self) -> String {
        self.format(short_type_name::<C>())
    }

    /// Error queue for an endpoint.
    #[must_use]
    pub fn error_queue(endpoint: &str) -> String {
        format!("{endpoint}{ERROR_QUEUE_SUFFIX}")
    }
}
