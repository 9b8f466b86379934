//! Typed repositories layered on top of the membership store.

pub mod membership;

pub use membership::MembershipRepository;
