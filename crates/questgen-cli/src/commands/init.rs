//! The `questgen init` command.

use anyhow::Result;

pub fn execute() -> Result<()> {
    if std::path::Path::new("questgen.toml").exists() {
        println!("questgen.toml already exists, skipping.");
    } else {
        std::fs::write("questgen.toml", SAMPLE_CONFIG)?;
        println!("Created questgen.toml");
    }

    std::fs::create_dir_all("blueprints")?;
    let example_path = std::path::Path::new("blueprints/example.toml");
    if example_path.exists() {
        println!("blueprints/example.toml already exists, skipping.");
    } else {
        std::fs::write(example_path, EXAMPLE_BLUEPRINT)?;
        println!("Created blueprints/example.toml");
    }

    println!("\nNext steps:");
    println!("  1. Edit questgen.toml with your API keys");
    println!("  2. Run: questgen validate --blueprint blueprints/example.toml");
    println!("  3. Run: questgen plan --blueprint blueprints/example.toml");
    println!("  4. Run: questgen generate --blueprint blueprints/example.toml");

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# questgen configuration

default_provider = "anthropic"
generation_model = "claude-sonnet-4-5"
validation_model = "claude-haiku-4-5"
temperature = 0.7
max_attempts_per_task = 3
parallelism = 4
output_dir = "./questgen-results"

[providers.anthropic]
type = "anthropic"
api_key = "${ANTHROPIC_API_KEY}"

[providers.openai]
type = "openai"
api_key = "${OPENAI_API_KEY}"

[validation]
explanation_word_limit = 200
reject_long_explanations = false
duplicate_window = 20

[storage]
type = "jsonl"
dir = "./questgen-data"
"#;

const EXAMPLE_BLUEPRINT: &str = r#"[blueprint]
test_type = "Year 7 Entrance"
section = "Verbal Reasoning"
strategy = "balanced"
modes = ["practice_1"]
answer_options = 4

[blueprint.difficulty]
strategy = "balanced"
levels = [1, 2, 3]

[[sub_skills]]
name = "Analogies"
count = 6

[[sub_skills]]
name = "Synonyms"
count = 6

[[examples.Analogies]]
question_text = "Hot is to cold as tall is to:"
answer_options = ["A) high", "B) short", "C) wide", "D) warm"]
correct_answer = "B"
explanation = "Hot and cold are opposites, so tall pairs with its opposite, short."

[[examples.Analogies]]
question_text = "Bird is to nest as bee is to:"
answer_options = ["A) honey", "B) flower", "C) hive", "D) wing"]
correct_answer = "C"
explanation = "A nest is where a bird lives; a hive is where a bee lives."

[[examples.Synonyms]]
question_text = "Which word is closest in meaning to 'rapid'?"
answer_options = ["A) slow", "B) quick", "C) quiet", "D) late"]
correct_answer = "B"
explanation = "Rapid means moving with speed, the same as quick."
"#;
