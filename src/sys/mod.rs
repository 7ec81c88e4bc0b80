pub(crate) mod caps;
pub(crate) mod notify;
pub(crate) mod unix;
