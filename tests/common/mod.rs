pub(crate) mod committee;

pub(crate) mod logging;

pub(crate) mod network;

pub(crate) mod node;

pub(crate) mod number_app;
