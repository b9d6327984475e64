pub mod acl;
pub mod api_cache;
pub mod authn;
pub mod authz;
pub mod credential;
pub mod events;
pub mod jwt;
pub mod moderation;
pub mod scope;
