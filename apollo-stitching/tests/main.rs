mod delegation;
mod errors;
mod healing;
mod subscriptions;
mod support;
mod transforms;
