mod common;
mod fulfillment;
mod routing;
