use shadow_rs::ShadowBuilder;

fn main() {
    // Build metadata for `sms-dispatch --version`
    ShadowBuilder::builder()
        .build()
        .expect("Failed to generate build metadata");
}
