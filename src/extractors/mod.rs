mod principal;

pub use principal::{Principal, PRINCIPAL_HEADER};
