//! # Seanco (Portal Session Service)
//!
//! `seanco` is the stateful half of a university research-submission portal:
//! students hand in thesis titles and chapters, advisers and panel members
//! review them, and the portal frontend calls this service on every page
//! load to answer two questions: "may this person log in?" and "is this
//! session still good?".
//!
//! ## Login Throttle
//!
//! Failed logins are counted **per username** inside a rolling window. Once
//! the window holds `max_login_attempts` failures the account is locked for
//! `lockout_duration` minutes; the lock clears itself when `locked_until`
//! elapses. Every attempt, good or bad, lands in the `login_attempts` audit
//! table and is pruned after 24 hours.
//!
//! ## Session Validator
//!
//! Sessions are bound to a client fingerprint (user agent + IP +
//! accept-language hash) and carry both an idle timeout and a 12-hour
//! absolute lifetime. Validation runs an ordered set of checks per request
//! and renews the idle window when less than five minutes remain. A
//! per-user expiry mirror in `PostgreSQL` lets an operator force a logout by
//! clearing a single column.
//!
//! ## Storage
//!
//! All persistence goes through the [`api::store::PortalStore`] trait; the
//! `PostgreSQL` implementation is wired at startup and an in-memory one backs
//! the tests. The relational schema ships in `sql/schema.sql` together with
//! seed rows for the recognized portal settings.

pub mod api;
pub mod cli;
