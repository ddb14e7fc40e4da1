//! Protobuf wire types for `proto/exchange.proto`.
//!
//! Checked-in prost output; regenerate with `prost-build` if the proto
//! changes.

/// One logical exchange message per stream write.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WireMessage {
    /// When set, `wants` is the sender's complete wantlist and the receiver
    /// should replace its view rather than merge.
    #[prost(bool, tag = "1")]
    pub full: bool,
    #[prost(message, repeated, tag = "2")]
    pub wants: ::prost::alloc::vec::Vec<wire_message::WantEntry>,
    #[prost(message, repeated, tag = "3")]
    pub blocks: ::prost::alloc::vec::Vec<wire_message::WireBlock>,
}

/// Nested message and enum types in `WireMessage`.
pub mod wire_message {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct WantEntry {
        #[prost(bytes = "vec", tag = "1")]
        pub key: ::prost::alloc::vec::Vec<u8>,
        #[prost(int32, tag = "2")]
        pub priority: i32,
        #[prost(bool, tag = "3")]
        pub cancel: bool,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct WireBlock {
        #[prost(bytes = "vec", tag = "1")]
        pub key: ::prost::alloc::vec::Vec<u8>,
        #[prost(bytes = "vec", tag = "2")]
        pub data: ::prost::alloc::vec::Vec<u8>,
    }
}
