mod helpers;
mod mocks;

mod payments;
mod verify;
mod webhooks;
