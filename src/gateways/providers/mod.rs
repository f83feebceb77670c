pub mod razorpay;

pub use razorpay::{RazorpayConfig, RazorpayGateway};
