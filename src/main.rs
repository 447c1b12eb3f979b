// src/main.rs

use std::{error::Error, net::SocketAddr, path::Path, sync::Arc};

use quiz_session::{
    client::{GradingApi, HttpGradingClient},
    config::Config,
    events::{EventBus, NoticeLevel, SessionEvent},
    models::{
        answer::AnswerValue,
        question::{QuestionKind, Quiz},
        submission::GradingResult,
    },
    routes,
    session::{Phase, ReconcileState, ResultView, SessionController},
    state::StubState,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader, Lines, Stdin},
    sync::broadcast::error::RecvError,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;
use validator::Validate;

type Input = Lines<BufReader<Stdin>>;

enum Flow {
    Continue,
    Quit,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Load configuration from environment (and .env, if present)
    let config = Config::from_env()?;

    let file_appender = tracing_appender::rolling::daily("logs", "quiz-session.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::new(&config.rust_log);
    // stdout belongs to the interactive prompt
    let console_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    // Initialize Tracing (Logging)
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    let quiz = load_quiz(&config.quiz_file).await?;
    tracing::info!(
        "Loaded quiz {} with {} questions",
        quiz.id,
        quiz.questions.len()
    );

    let base_url = match &config.grader_url {
        Some(url) => url.clone(),
        None => spawn_stub_grader(&quiz, &config).await?,
    };
    tracing::info!("Grading backend: {}", base_url);

    let api: Arc<dyn GradingApi> = Arc::new(HttpGradingClient::new(
        base_url,
        config.grader_token.clone(),
        config.request_timeout,
    )?);

    let bus = EventBus::default();
    let mut events = bus.register();
    let session = SessionController::start(&quiz, api, bus.clone(), config.session)?;

    print_questions(&session);
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    render_event(&event);
                    if let SessionEvent::GradingUpdated { state } = &event {
                        if is_final(state) {
                            break;
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Display fell behind; {} events skipped", skipped);
                    if let Some(state) = session.result_state() {
                        if is_final(&state) {
                            render_result(&state);
                            break;
                        }
                    }
                }
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line() => {
                let Some(line) = line? else {
                    session.abandon();
                    break;
                };
                if let Flow::Quit = handle_command(&session, line.trim(), &mut lines).await? {
                    session.abandon();
                    break;
                }
            }
        }
    }

    bus.dispose();
    Ok(())
}

/// Terminal states the user cannot act on any more.
fn is_final(state: &ReconcileState) -> bool {
    state.is_terminal() && *state != ReconcileState::TimedOut
}

async fn load_quiz(path: &Path) -> Result<Quiz, Box<dyn Error>> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        tracing::error!("Failed to read quiz file {}: {}", path.display(), e);
        e
    })?;
    let quiz: Quiz = serde_json::from_str(&raw)?;
    quiz.validate()?;
    Ok(quiz)
}

/// Serves the stub grader on an ephemeral local port.
async fn spawn_stub_grader(quiz: &Quiz, config: &Config) -> Result<Url, Box<dyn Error>> {
    let mut state = StubState::new(quiz.clone(), config.stub_polls_before_complete);
    state.token = config.grader_token.clone();
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
    let addr = listener.local_addr()?;
    tracing::info!("Stub grader listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Stub grader stopped: {}", e);
        }
    });

    Ok(Url::parse(&format!("http://{}/", addr))?)
}

async fn handle_command(
    session: &SessionController,
    line: &str,
    lines: &mut Input,
) -> Result<Flow, Box<dyn Error>> {
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return Ok(Flow::Continue);
    };

    match command {
        "help" => print_help(),
        "list" => print_questions(session),
        "answer" => {
            let (Some(id), Some(raw)) = (parts.next(), parts.next()) else {
                println!("usage: answer <question-id> <option-number>");
                return Ok(Flow::Continue);
            };
            match raw.parse::<usize>() {
                Ok(number) if number >= 1 => {
                    report(session.set_answer(id, AnswerValue::choice(number - 1)));
                }
                _ => println!("Option numbers start at 1"),
            }
        }
        "code" => {
            let Some(id) = parts.next() else {
                println!("usage: code <question-id>");
                return Ok(Flow::Continue);
            };
            println!("Enter your code, then a line with a single '.'");
            let mut source = Vec::new();
            while let Some(line) = lines.next_line().await? {
                if line.trim() == "." {
                    break;
                }
                source.push(line);
            }
            report(session.set_answer(id, AnswerValue::code(source.join("\n"))));
        }
        "clear" => match parts.next() {
            Some(id) => report(session.clear_answer(id)),
            None => println!("usage: clear <question-id>"),
        },
        "submit" => {
            if let Err(e) = session.submit().await {
                println!("{}", e);
            }
        }
        "retry" => {
            if let Err(e) = session.retry_submission().await {
                println!("{}", e);
            }
        }
        "refresh" => {
            if !session.refresh_result() {
                println!("Nothing submitted yet");
            }
        }
        "status" => {
            let progress = session.progress();
            println!(
                "{}/{} answered, {}s left, {:?}",
                progress.answered,
                progress.total,
                progress.remaining_seconds,
                session.phase()
            );
            if let Some(state) = session.result_state() {
                render_result(&state);
            }
        }
        "quit" | "exit" => {
            if session.phase() == Phase::Running {
                println!("Leaving without submitting.");
            }
            return Ok(Flow::Quit);
        }
        other => println!("Unknown command '{}'. Type 'help'.", other),
    }

    Ok(Flow::Continue)
}

fn report(result: quiz_session::error::Result<()>) {
    if let Err(e) = result {
        println!("{}", e);
    }
}

fn print_help() {
    println!("Commands:");
    println!("  list                      show questions");
    println!("  answer <id> <n>           pick option n of a multiple-choice question");
    println!("  code <id>                 enter code for a code question");
    println!("  clear <id>                clear an answer");
    println!("  submit                    submit now");
    println!("  retry                     re-send after a failed submission");
    println!("  refresh                   check the grading status again");
    println!("  status                    show progress");
    println!("  quit                      leave without submitting");
}

fn print_questions(session: &SessionController) {
    let attempt = session.attempt();
    println!(
        "== {} ({}s, {} points) ==",
        attempt.title(),
        attempt.time_limit_seconds(),
        attempt.max_score()
    );
    for question in attempt.questions() {
        let answered = session.is_answered(&question.id).unwrap_or(false);
        let mark = if answered { "x" } else { " " };
        println!(
            "[{}] {} ({} pts): {}",
            mark, question.id, question.points, question.content
        );
        match &question.kind {
            QuestionKind::MultipleChoice { options, .. } => {
                for (i, option) in options.iter().enumerate() {
                    println!("      {}. {}", i + 1, option);
                }
            }
            QuestionKind::Code { language, .. } => println!("      ({} code)", language),
        }
    }
}

fn render_event(event: &SessionEvent) {
    match event {
        SessionEvent::Tick { remaining_seconds } => {
            let remaining = *remaining_seconds;
            if remaining > 0 && (remaining <= 10 || remaining % 60 == 0) {
                println!("{}s remaining", remaining);
            }
        }
        SessionEvent::AnswerChanged {
            answered, total, ..
        } => println!("{}/{} answered", answered, total),
        SessionEvent::SubmissionStarted { .. } => println!("Submitting..."),
        SessionEvent::GradingUpdated { state } => render_result(state),
        SessionEvent::Notice { level, message } => {
            let tag = match level {
                NoticeLevel::Info => "info",
                NoticeLevel::Success => "ok",
                NoticeLevel::Warning => "warn",
                NoticeLevel::Error => "error",
            };
            println!("[{}] {}", tag, message);
        }
        _ => {}
    }
}

fn render_result(state: &ReconcileState) {
    match state.view() {
        ResultView::Progress { message } => println!("{}", message),
        ResultView::Report(result) => print_report(result),
        ResultView::RetryPrompt { message } => println!("{}", message),
        ResultView::Missing => println!("Result not found."),
    }
}

fn print_report(result: &GradingResult) {
    println!(
        "Score: {} / {} ({:.1}%)",
        result.total_score.unwrap_or(0.0),
        result.max_score.unwrap_or(0.0),
        result.percentage.unwrap_or(0.0)
    );
    if let Some(seconds) = result.time_spent {
        println!("Time spent: {}m {}s", seconds / 60, seconds % 60);
    }
    for answer in &result.answers {
        let verdict = if answer.is_correct { "correct" } else { "wrong" };
        print!("  {}: {} ({} pts)", answer.question_id, verdict, answer.score);
        if let Some(execution) = &answer.execution {
            print!(
                ", tests {}/{}",
                execution.passed_tests, execution.total_tests
            );
        }
        println!();
    }
}
