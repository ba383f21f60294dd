pub const PCR_GRADIENT_DISPLAY_VERSION: &str = env!("PCR_GRADIENT_DISPLAY_VERSION");
pub const PCR_GRADIENT_BUILD_N: &str = env!("PCR_GRADIENT_BUILD_N");

pub fn version_cli_text() -> String {
    format!(
        "pcr-gradient {}\nBuild {}\nMaster-mix and gradient-plate planner for multichannel PCR setup",
        PCR_GRADIENT_DISPLAY_VERSION, PCR_GRADIENT_BUILD_N
    )
}
