//! Production domain modules.

mod ad_skip;
mod elements;
mod info;
mod page;
mod pip;
mod status;

pub use ad_skip::AdSkipDomain;
pub use elements::ElementsDomain;
pub use info::InfoDomain;
pub use page::PageDomain;
pub use pip::{PipDomain, TOGGLE_LABEL};
pub use status::StatusDomain;

use crate::domain::DomainModule;

/// One instance of every production module, in no particular order.
pub fn default_modules() -> Vec<Box<dyn DomainModule>> {
    vec![
        Box::new(PageDomain::new()),
        Box::new(PipDomain::new()),
        Box::new(AdSkipDomain::new()),
        Box::new(InfoDomain::new()),
        Box::new(StatusDomain::new()),
        Box::new(ElementsDomain::new()),
    ]
}
