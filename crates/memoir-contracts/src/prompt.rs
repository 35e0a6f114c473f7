use crate::decade::Decade;

/// Directive appended to every generation attempt after the first.
pub const IMAGE_ONLY_DIRECTIVE: &str = "Return only an image. Do not respond with text.";

pub fn decade_style(decade: Decade) -> &'static str {
    match decade {
        Decade::Forties => "authentic 1940s black-and-white photography, wartime documentary feel, period-accurate clothing and settings, soft window light, high contrast, visible film grain, slight softness, minor framing imperfections",
        Decade::Fifties => "authentic 1950s black-and-white mid-century photography, silver gelatin print look, period-accurate fashion and interiors, clean contrast, subtle halation, fine grain, slight print texture, tiny focus falloff",
        Decade::Sixties => "authentic 1960s black-and-white documentary photography, candid street style, period-accurate fashion and settings, punchy contrast, noticeable film grain, slight softness, minor motion blur",
        Decade::Seventies => "authentic 1970s color film photography, warm and slightly faded tones, period-accurate fashion and interiors, natural light, visible grain, classic Kodak color print look, minor exposure variance, handheld snapshot feel",
        Decade::Eighties => "authentic 1980s color film photography, slightly saturated colors, indoor tungsten and on-camera flash feel, period-accurate fashion and settings, candid snapshot style, visible grain, slight softness, uneven focus",
        Decade::Nineties => "authentic 1990s color photography, consumer 35mm film or early digital feel, direct flash, cooler tones, period-accurate fashion and technology, candid snapshot look, mild noise, slight white balance shifts",
        Decade::TwoThousands => "authentic early 2000s digital photography, compact point-and-shoot look, lower dynamic range, slight compression artifacts, mild noise, minor motion blur, casual snapshot framing",
        Decade::TwentyTens => "authentic 2010s digital photography, DSLR or smartphone look, natural lighting, period-accurate fashion and technology, candid lifestyle feel, slight processing, mild noise, minor focus hunting",
        Decade::TwentyTwenties => "authentic 2020s digital photography, high-resolution smartphone look, natural lighting, contemporary fashion and technology, candid documentary feel, subtle processing, mild noise, slight exposure inconsistency",
    }
}

/// Builds the generation instruction for a remembered scene.
pub fn build_instruction(memory: &str, decade: Decade) -> String {
    format!(
        "A nostalgic scene from the {label} depicting: {memory}. Style: {style}. High quality, detailed, evocative of personal memories.",
        label = decade.label(),
        memory = memory.trim(),
        style = decade_style(decade),
    )
}

/// Instruction text for a zero-based generation attempt.
pub fn instruction_for_attempt(instruction: &str, attempt: u32) -> String {
    if attempt == 0 {
        return instruction.to_string();
    }
    format!("{instruction}\n\n{IMAGE_ONLY_DIRECTIVE}")
}
