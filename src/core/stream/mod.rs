mod dispatcher;

pub use dispatcher::{StreamControl, StreamDispatcher, SubscribeOptions, Subscription};
