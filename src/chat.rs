//! Teacher personas for the student chat. Replies come from fixed tables;
//! there is no model behind them.

pub struct Teacher {
    pub name: &'static str,
    pub subject: &'static str,
    pub greeting: &'static str,
    keywords: &'static [&'static str],
    replies: &'static [&'static str],
}

impl Teacher {
    /// Whether one of this teacher's subject keywords appears in the question.
    pub fn covers(&self, question: &str) -> bool {
        let question = question.to_lowercase();
        self.keywords
            .iter()
            .any(|keyword| question.contains(keyword))
    }
}

pub const TEACHERS: &[Teacher] = &[
    Teacher {
        name: "Marilene",
        subject: "Matemática",
        greeting: "Olá! Sou a professora Marilene de Matemática. Vamos descobrir juntos como a matemática pode ser interessante e útil!",
        keywords: &["matemática", "álgebra", "geometria", "equação", "função", "número", "cálculo", "estatística", "probabilidade"],
        replies: &[
            "Ótima pergunta matemática! Vamos resolver passo a passo...",
            "Na matemática, sempre seguimos uma lógica...",
            "Vamos usar um exemplo prático para entender melhor...",
        ],
    },
    Teacher {
        name: "Lizena",
        subject: "Português",
        greeting: "Olá, querido aluno! Sou a professora Lizena de Português. Estou aqui para te ajudar com nossa bela língua portuguesa!",
        keywords: &["português", "gramática", "literatura", "texto", "redação", "ortografia", "verbo", "substantivo"],
        replies: &[
            "Muito bem observado! Em português, essa regra funciona assim...",
            "Vamos analisar essa estrutura gramatical juntos...",
            "Na literatura brasileira, encontramos exemplos similares...",
        ],
    },
    Teacher {
        name: "Renato",
        subject: "História",
        greeting: "Olá, jovens! Sou o professor Renato de História. Vamos viajar no tempo e descobrir as histórias que moldaram nosso mundo!",
        keywords: &["história", "guerra", "revolução", "brasil", "descobrimento", "império", "república", "idade média"],
        replies: &[
            "Que pergunta histórica fascinante! Vamos viajar no tempo...",
            "Naquela época, as coisas funcionavam de forma diferente...",
            "Esse evento histórico teve consequências importantes...",
        ],
    },
    Teacher {
        name: "Geraldo William",
        subject: "Geografia",
        greeting: "Olá! Sou o professor Geraldo William de Geografia. Vamos explorar nosso planeta e entender melhor o mundo em que vivemos!",
        keywords: &["geografia", "mapa", "clima", "relevo", "população", "país", "estado", "continente"],
        replies: &[
            "Interessante questão geográfica! Vamos explorar esse lugar...",
            "No mapa, podemos observar que...",
            "Essa região tem características muito particulares...",
        ],
    },
    Teacher {
        name: "Jessica",
        subject: "Ciências",
        greeting: "Oi! Sou a professora Jessica de Ciências. Vamos explorar juntos o mundo fascinante da ciência!",
        keywords: &["ciências", "biologia", "física", "química", "corpo humano", "meio ambiente", "experimento"],
        replies: &[
            "Excelente pergunta científica! Vamos investigar isso...",
            "Na ciência, sempre começamos com uma hipótese...",
            "Isso me lembra de um experimento que fizemos...",
        ],
    },
    Teacher {
        name: "Alessandro",
        subject: "Artes",
        greeting: "Olá! Sou o professor Alessandro de Artes. Estou aqui para te ajudar com tudo relacionado à arte, criatividade e expressão artística!",
        keywords: &["arte", "desenho", "pintura", "cor", "artista", "movimento artístico", "escultura"],
        replies: &[
            "Que pergunta interessante sobre arte! Vamos explorar isso juntos...",
            "Na arte, sempre há espaço para criatividade e expressão pessoal...",
            "Lembro-me de um artista que trabalhou com essa técnica...",
        ],
    },
    Teacher {
        name: "João da Mata",
        subject: "Educação Física",
        greeting: "E aí, pessoal! Sou o professor João da Mata de Educação Física. Vamos nos movimentar e aprender sobre esporte e saúde!",
        keywords: &["educação física", "esporte", "exercício", "futebol", "basquete", "saúde", "corpo"],
        replies: &[
            "Ótima pergunta sobre educação física! Vamos nos movimentar...",
            "No esporte, a técnica é fundamental...",
            "Lembro de um atleta que dominava essa habilidade...",
        ],
    },
    Teacher {
        name: "Alessandra",
        subject: "Redação",
        greeting: "Olá! Sou a professora Alessandra de Redação. Vamos juntos transformar suas ideias em textos incríveis!",
        keywords: &["redação", "dissertação", "argumentação", "texto", "escrita", "parágrafo", "introdução"],
        replies: &[
            "Excelente pergunta sobre redação! Vamos estruturar suas ideias...",
            "Na escrita, a organização das ideias é fundamental...",
            "Vamos trabalhar a argumentação neste texto...",
        ],
    },
];

pub fn find_teacher(name: &str) -> Option<&'static Teacher> {
    let name = name.trim().to_lowercase();
    TEACHERS
        .iter()
        .find(|teacher| teacher.name.to_lowercase() == name)
}

/// First teacher whose subject keywords appear in the question, in
/// registry order.
pub fn identify_subject(question: &str) -> Option<&'static Teacher> {
    TEACHERS.iter().find(|teacher| teacher.covers(question))
}

/// Reply for the `turn`-th student message in a conversation (0-based).
/// Questions outside the teacher's own subjects are pointed at the first
/// teacher who covers them.
pub fn teacher_reply(teacher: &Teacher, question: &str, turn: usize) -> String {
    if !teacher.covers(question) {
        if let Some(other) = identify_subject(question) {
            return format!(
                "Olha, acho melhor verificarmos isso com o professor/a {}.",
                other.name
            );
        }
    }

    let opening = teacher.replies[turn % teacher.replies.len()];
    format!(
        "{opening} Sobre sua pergunta: \"{question}\" - Esta é uma questão importante em {}. Continue estudando e fazendo perguntas!",
        teacher.subject
    )
}

pub fn conversation_title(teacher: &Teacher) -> String {
    format!("Conversa com {}", teacher.name)
}
