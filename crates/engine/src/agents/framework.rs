/// Keyword table for detecting the target framework from prompt text.
/// Checked in order; the first entry with any matching keyword wins, so
/// frameworks with distinctive markers sit above ones with generic markers
/// that overlap (e.g. `@injectable` appears in both NestJS and Angular).
const FRAMEWORK_KEYWORDS: &[(&str, &str, &[&str])] = &[
    (
        "NestJS",
        "TypeScript",
        &["nestjs", "nest.js", "nest js", "@nestjs", "@controller", "@injectable", "@module"],
    ),
    (
        "React",
        "JavaScript",
        &["react", "reactjs", "react.js", "jsx", "tsx", "usestate", "useeffect", "react component"],
    ),
    (
        "FastAPI",
        "Python",
        &["fastapi", "fast api", "@app.get", "@app.post", "pydantic", "uvicorn"],
    ),
    (
        "Django",
        "Python",
        &["django", "django rest", "drf", "django.db", "models.model", "django views"],
    ),
    (
        "Express.js",
        "JavaScript",
        &["express", "expressjs", "express.js", "app.get", "app.post", "express router"],
    ),
    (
        "Vue.js",
        "JavaScript",
        &["vue", "vuejs", "vue.js", "vue component", "v-model", "v-if", "v-for"],
    ),
    (
        "Angular",
        "TypeScript",
        &["angular", "@angular", "@component", "ngmodule", "angular component"],
    ),
    (
        "Spring Boot",
        "Java",
        &["spring boot", "spring", "@restcontroller", "@service", "@autowired", "springboot"],
    ),
    (
        ".NET Core",
        "C#",
        &[".net", "dotnet", "asp.net", "c#", "csharp", "[apicontroller]", "[httpget]"],
    ),
    (
        "Next.js",
        "JavaScript",
        &["next.js", "nextjs", "next js", "getserversideprops", "getstaticprops"],
    ),
    (
        "Flask",
        "Python",
        &["flask", "@app.route", "flask.request", "flask app"],
    ),
];

/// Scan a prompt for framework markers. Returns (framework, language) of
/// the first match, or None when nothing in the table fires.
pub fn detect_framework(prompt: &str) -> Option<(&'static str, &'static str)> {
    let lowered = prompt.to_lowercase();

    for (framework, language, keywords) in FRAMEWORK_KEYWORDS {
        if keywords.iter().any(|kw| lowered.contains(kw)) {
            return Some((framework, language));
        }
    }

    None
}
