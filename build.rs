fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=build.rs");

    // Messages are hand-written prost types in src/grpc/proto.rs, so the
    // service stubs are generated without protoc.
    let greeter = tonic_build::manual::Service::builder()
        .name("GreeterService")
        .package("samples.api")
        .method(
            tonic_build::manual::Method::builder()
                .name("say_hello")
                .route_name("SayHello")
                .input_type("crate::grpc::proto::GreetingRequest")
                .output_type("crate::grpc::proto::GreetingResponse")
                .codec_path("tonic::codec::ProstCodec")
                .build(),
        )
        .method(
            tonic_build::manual::Method::builder()
                .name("ping")
                .route_name("Ping")
                .input_type("crate::grpc::proto::PingRequest")
                .output_type("crate::grpc::proto::PingResponse")
                .codec_path("tonic::codec::ProstCodec")
                .build(),
        )
        .build();

    let admin = tonic_build::manual::Service::builder()
        .name("CongestionControl")
        .package("congestion.admin")
        .method(
            tonic_build::manual::Method::builder()
                .name("apply_policy")
                .route_name("ApplyPolicy")
                .input_type("crate::grpc::proto::PolicyRequest")
                .output_type("crate::grpc::proto::PolicyAck")
                .codec_path("tonic::codec::ProstCodec")
                .build(),
        )
        .method(
            tonic_build::manual::Method::builder()
                .name("get_status")
                .route_name("GetStatus")
                .input_type("crate::grpc::proto::StatusRequest")
                .output_type("crate::grpc::proto::StatusResponse")
                .codec_path("tonic::codec::ProstCodec")
                .build(),
        )
        .build();

    tonic_build::manual::Builder::new()
        .build_server(true)
        .build_client(true)
        .compile(&[greeter, admin]);

    Ok(())
}
