//! Generation prompts.
//!
//! Every service prompt requires the generated code to take its port from
//! the environment, so the leased port works without editing the output.

use crate::core::Language;

const CODE_ONLY: &str = "Output only the code, with no markdown fences and no explanation.";

/// Prompt for the service (or page) itself.
#[must_use]
pub fn code_prompt(language: Language) -> String {
    let body = match language {
        Language::Html => {
            "Write a single index.html page with inline CSS and JavaScript that shows the Iris \
             dataset in a table. Load the rows with fetch('data.csv') (exactly that relative \
             path). The file has five columns: sepal length, sepal width, petal length, petal \
             width and species; render a header row with those names and one table row per CSV \
             line, skipping empty or malformed lines. If the fetch fails, log the error to the \
             console and show 'Error: Unable to load data' in the table. Give the table the id \
             'data-table'."
        }
        Language::Python => {
            "Write app.py, a Flask application exposing GET /hello, returning the JSON \
             {\"message\": \"Hello, World!\"}, and GET /data, which reads data.csv from the \
             working directory with pandas and returns the first five rows as JSON, or \
             {\"error\": \"Dataset not found\"} when the file is missing. Use jsonify. Start \
             the server only under `if __name__ == '__main__':` with \
             app.run(host='127.0.0.1', port=int(os.environ.get('FLASK_PORT', os.environ.get('PORT', 5000)))). \
             Indent with four spaces."
        }
        Language::Julia => {
            "Write app.jl, a Genie.jl application with routes /hello, returning the JSON \
             Dict(\"message\" => \"Hello, World!\"), and /data, which reads data.csv relative to \
             the script directory (joinpath(@__DIR__, \"data.csv\")) with CSV.jl and DataFrames.jl \
             and returns the first five rows as JSON, or Dict(\"error\" => \"Dataset not found\") \
             when the file is missing. Read the port with \
             parse(Int, get(ENV, \"GENIE_PORT\", get(ENV, \"PORT\", \"8000\"))) and start the \
             server with up(port; host=\"127.0.0.1\", async=false)."
        }
    };
    format!("{body} {CODE_ONLY}")
}

/// Prompt for the generated test file.
#[must_use]
pub fn test_prompt(language: Language) -> String {
    let body = match language {
        Language::Html => {
            "Write Jest tests (jsdom environment, start the file with the /** @jest-environment \
             jsdom */ docblock) for a page that loads data.csv into the table with id \
             'data-table'. Mock global.fetch to return a small CSV, run the same DOM-building \
             logic inline in the test (do not import the HTML file), and assert the number of \
             rendered rows. Also test that a rejected fetch shows 'Error: Unable to load data'."
        }
        Language::Python => {
            "Write pytest tests for the Flask app in app.py. Import it with `from app import app` \
             (the project root is on PYTHONPATH). Use a fixture yielding app.test_client() with \
             TESTING enabled. Assert /hello returns 200 and {\"message\": \"Hello, World!\"}; \
             assert /data returns 200 and either a JSON object of rows when data.csv exists \
             (check with pathlib.Path) or {\"error\": \"Dataset not found\"}. Indent with four \
             spaces."
        }
        Language::Julia => {
            "Write a Julia test file using Test, HTTP and JSON3 for a Genie service that is \
             already running. Read its base URL from ENV[\"APP_URL\"] (do not include or start \
             app.jl). In one @testset, assert GET /hello returns status 200 and a body whose \
             message field is \"Hello, World!\", and that GET /data returns status 200."
        }
    };
    format!("{body} {CODE_ONLY}")
}

/// Prompt for the README.
#[must_use]
pub fn doc_prompt(language: Language) -> String {
    let (what, run, test) = match language {
        Language::Html => (
            "a static page (index.html) that renders data.csv, the Iris dataset, as a table",
            "python3 -m http.server 8081",
            "npm install && npm test",
        ),
        Language::Python => (
            "a Flask API with /hello and /data endpoints, where /data returns the first five rows of data.csv",
            "FLASK_PORT=8081 python3 app.py",
            "pytest tests/python --verbose",
        ),
        Language::Julia => (
            "a Genie.jl API with /hello and /data endpoints",
            "GENIE_PORT=8081 julia --project=. app.jl",
            "julia --project=. -e 'cd(\"tests/julia\"); include(\"test_app.jl\")'",
        ),
    };
    format!(
        "Write README.md for {what}. Include sections for installation, running (`{run}`) and \
         testing (`{test}`). Output only the markdown document; do not wrap it in a code fence."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_services_take_port_from_environment() {
        assert!(code_prompt(Language::Python).contains("FLASK_PORT"));
        assert!(code_prompt(Language::Julia).contains("GENIE_PORT"));
        assert!(test_prompt(Language::Julia).contains("APP_URL"));
    }

    #[test]
    fn test_prompts_ask_for_bare_code() {
        for language in Language::ALL {
            assert!(code_prompt(language).ends_with(CODE_ONLY));
            assert!(test_prompt(language).ends_with(CODE_ONLY));
            assert!(doc_prompt(language).contains("README.md"));
        }
    }
}
